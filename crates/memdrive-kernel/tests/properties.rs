//! Behavioral properties of the drive.
//!
//! Randomized cases use a seeded `StdRng` so failures reproduce.

use memdrive_kernel::vfs::VNode;
use memdrive_kernel::{
    CreateOptions, DirectoryEnumerator, DriveConfig, MemoryDrive, NodeId, NodeStore, VfsError,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn drive() -> MemoryDrive {
    MemoryDrive::new(DriveConfig {
        case_sensitive: true,
        ..DriveConfig::default()
    })
}

fn names(entries: Vec<memdrive_kernel::DirEntry>) -> Vec<String> {
    entries.into_iter().map(|e| e.name).collect()
}

// ============================================================================
// Buffer growth and read clamping
// ============================================================================

#[test]
fn buffer_growth_preserves_untouched_bytes() {
    let d = drive();
    d.create_file("/f", &CreateOptions::new()).unwrap();
    let mut rng = StdRng::seed_from_u64(0x6d656d64);
    let mut model: Vec<u8> = Vec::new();

    for _ in 0..200 {
        let pos = rng.gen_range(0..4096u64);
        let len = rng.gen_range(0..300usize);
        let data: Vec<u8> = (0..len).map(|_| rng.r#gen()).collect();

        assert_eq!(d.write("/f", pos, &data).unwrap(), len);

        let end = pos as usize + len;
        if model.len() < end {
            model.resize(end, 0);
        }
        model[pos as usize..end].copy_from_slice(&data);

        let info = d.get_info("/f").unwrap();
        assert!(info.size >= pos + len as u64);
        assert!(info.allocation_size >= info.size);
        assert_eq!(info.size, model.len() as u64);
        assert_eq!(d.read("/f", 0, model.len() + 10).unwrap(), model);
    }
}

#[test]
fn read_clamps_to_logical_size() {
    let d = drive();
    d.create_file("/f", &CreateOptions::new().with_initial_allocation(1024))
        .unwrap();
    d.write("/f", 0, b"0123456789").unwrap();
    let size = d.get_info("/f").unwrap().size;
    assert_eq!(size, 10);

    for pos in [10u64, 11, 1000, u64::MAX] {
        assert!(d.read("/f", pos, 16).unwrap().is_empty(), "pos {pos}");
    }
    for pos in 0..10u64 {
        let got = d.read("/f", pos, 100).unwrap();
        assert_eq!(got.len() as u64, size - pos);
        assert_eq!(got, &b"0123456789"[pos as usize..]);
    }
}

// ============================================================================
// Rename atomicity
// ============================================================================

/// Every non-root node sits in exactly one child list, and that list belongs
/// to the node's recorded parent.
fn assert_single_parent(store: &NodeStore, ids: &[NodeId]) {
    for &id in ids {
        let parent = store.get(id).unwrap().parent().unwrap();
        let holders: Vec<NodeId> = ids
            .iter()
            .copied()
            .chain(std::iter::once(store.root()))
            .filter(|&d| {
                store
                    .get(d)
                    .and_then(|n| n.children())
                    .is_some_and(|c| c.ids().contains(&id))
            })
            .collect();
        assert_eq!(holders, vec![parent], "node {id}");
    }
}

#[test]
fn random_moves_keep_single_parent() {
    let mut store = NodeStore::new(true);
    let root = store.root();
    let mut dirs = Vec::new();
    for i in 0..12 {
        let id = store.insert(VNode::directory(format!("d{i}")));
        store.add_child(root, id).unwrap();
        dirs.push(id);
    }

    let mut rng = StdRng::seed_from_u64(42);
    for step in 0..300 {
        let node = dirs[rng.gen_range(0..dirs.len())];
        let target = if rng.gen_bool(0.2) {
            root
        } else {
            dirs[rng.gen_range(0..dirs.len())]
        };
        let name = format!("d{}", rng.gen_range(0..12));
        match store.move_node(node, target, &name) {
            Ok(()) => {
                assert_eq!(store.get(node).unwrap().parent(), Some(target));
                assert_eq!(store.get(node).unwrap().name(), name);
            }
            Err(VfsError::AlreadyExists(_) | VfsError::InvalidArgument(_)) => {}
            Err(e) => panic!("step {step}: unexpected {e}"),
        }
        assert_single_parent(&store, &dirs);
    }
}

#[test]
fn renamed_file_has_exactly_one_path() {
    let d = drive();
    d.mkdir("/a", &CreateOptions::new()).unwrap();
    d.mkdir("/b", &CreateOptions::new()).unwrap();
    d.create_file("/a/x", &CreateOptions::new()).unwrap();
    d.write("/a/x", 0, b"marker").unwrap();

    d.rename("/a/x", "/b/y", false).unwrap();

    assert!(matches!(d.get_info("/a/x"), Err(VfsError::NotFound(_))));
    assert!(names(d.read_dir("/a", None).unwrap()).is_empty());
    assert_eq!(names(d.read_dir("/b", None).unwrap()), ["y"]);
    assert_eq!(d.read("/b/y", 0, 16).unwrap(), b"marker");
}

#[test]
fn directory_move_carries_subtree() {
    let d = drive();
    d.mkdir("/src", &CreateOptions::new()).unwrap();
    d.mkdir("/src/inner", &CreateOptions::new()).unwrap();
    d.create_file("/src/inner/f", &CreateOptions::new()).unwrap();
    d.mkdir("/dst", &CreateOptions::new()).unwrap();

    d.rename("/src", "/dst/moved", false).unwrap();

    assert!(!d.exists("/src"));
    assert!(d.exists("/dst/moved/inner/f"));
    assert_eq!(names(d.read_dir("/", None).unwrap()), ["dst"]);
}

// ============================================================================
// Enumeration
// ============================================================================

#[test]
fn restart_always_lists_in_insertion_order() {
    let d = drive();
    for name in ["a", "b", "c"] {
        d.create_file(&format!("/{name}"), &CreateOptions::new())
            .unwrap();
    }
    let mut session = DirectoryEnumerator::new();

    for partial in 0..4 {
        // Leave the cursor somewhere in the middle, then restart.
        let mut restart = true;
        for _ in 0..partial {
            d.enumerate(&mut session, "/", None, restart).unwrap();
            restart = false;
        }

        let mut seen = Vec::new();
        let mut restart = true;
        while let Some(entry) = d.enumerate(&mut session, "/", None, restart).unwrap() {
            seen.push(entry.name);
            restart = false;
        }
        assert_eq!(seen, ["a", "b", "c"], "after {partial} partial steps");
    }
}

#[test]
fn exact_match_is_one_shot() {
    let d = drive();
    d.create_file("/foo.txt", &CreateOptions::new()).unwrap();
    d.create_file("/bar.txt", &CreateOptions::new()).unwrap();
    let mut session = DirectoryEnumerator::new();

    let first = d
        .enumerate(&mut session, "/", Some("foo.txt"), false)
        .unwrap();
    assert_eq!(first.map(|e| e.name), Some("foo.txt".to_string()));
    for _ in 0..5 {
        assert!(d
            .enumerate(&mut session, "/", Some("foo.txt"), false)
            .unwrap()
            .is_none());
    }
}

#[test]
fn exact_mask_without_match_finds_nothing() {
    let d = drive();
    d.create_file("/foo.txt", &CreateOptions::new()).unwrap();
    let mut session = DirectoryEnumerator::new();
    assert!(d
        .enumerate(&mut session, "/", Some("nope.txt"), true)
        .unwrap()
        .is_none());
}

/// Mode is decided from each request before the stored cursor is consulted,
/// so interleaving restart and non-restart calls with different masks never
/// reads a stale exact flag.
#[test]
fn cursor_mode_follows_request_in_any_order() {
    let d = drive();
    for name in ["foo.txt", "bar.txt", "baz.rs"] {
        d.create_file(&format!("/{name}"), &CreateOptions::new())
            .unwrap();
    }
    let mut s = DirectoryEnumerator::new();
    let mut next = |mask: Option<&str>, restart: bool| {
        d.enumerate(&mut s, "/", mask, restart)
            .unwrap()
            .map(|e| e.name)
    };

    // Non-restart exact request with no cursor yet.
    assert_eq!(next(Some("bar.txt"), false).as_deref(), Some("bar.txt"));
    // Wildcard without restart: the mode changed, so listing starts over.
    assert_eq!(next(Some("*.txt"), false).as_deref(), Some("foo.txt"));
    assert_eq!(next(Some("*.txt"), false).as_deref(), Some("bar.txt"));
    // Restart with an exact mask in the middle of a wildcard listing.
    assert_eq!(next(Some("baz.rs"), true).as_deref(), Some("baz.rs"));
    assert_eq!(next(Some("baz.rs"), false), None);
    // Restart back into wildcard mode.
    assert_eq!(next(None, true).as_deref(), Some("foo.txt"));
    assert_eq!(next(None, false).as_deref(), Some("bar.txt"));
    assert_eq!(next(None, false).as_deref(), Some("baz.rs"));
    assert_eq!(next(None, false), None);
}

#[test]
fn listing_observes_changes_between_calls() {
    let d = drive();
    d.create_file("/a", &CreateOptions::new()).unwrap();
    d.create_file("/b", &CreateOptions::new()).unwrap();
    let mut s = DirectoryEnumerator::new();

    assert_eq!(d.enumerate(&mut s, "/", None, true).unwrap().unwrap().name, "a");
    d.create_file("/c", &CreateOptions::new()).unwrap();
    assert_eq!(d.enumerate(&mut s, "/", None, false).unwrap().unwrap().name, "b");
    assert_eq!(d.enumerate(&mut s, "/", None, false).unwrap().unwrap().name, "c");
    assert!(d.enumerate(&mut s, "/", None, false).unwrap().is_none());
}

// ============================================================================
// Delete guard
// ============================================================================

#[test]
fn rmdir_requires_empty_directory() {
    let d = drive();
    d.mkdir("/d", &CreateOptions::new()).unwrap();
    d.create_file("/d/child", &CreateOptions::new()).unwrap();

    assert!(matches!(d.rmdir("/d"), Err(VfsError::DirectoryNotEmpty(_))));
    assert!(d.exists("/d/child"));

    d.delete("/d/child").unwrap();
    assert!(d.is_directory_empty("/d").unwrap());
    d.rmdir("/d").unwrap();
    assert!(matches!(d.get_info("/d"), Err(VfsError::NotFound(_))));
    assert!(names(d.read_dir("/", None).unwrap()).is_empty());
}

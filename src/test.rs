//! Shared test scaffolding, in the shape of the teacher's own
//! `lib/src/test.rs`: build a throwaway [`LocalStorage`] rooted at a temp
//! directory, hand it to the closure, then clean up regardless of whether
//! the closure panicked.

use std::panic;

use tempfile::TempDir;

use crate::storage::LocalStorage;

/// Run `f` against a fresh, empty [`LocalStorage`] backed by a temp
/// directory, propagating any panic after the directory is removed.
pub fn run_in_empty_dir<F>(f: F)
where
    F: FnOnce(&LocalStorage) + panic::UnwindSafe,
{
    let dir = TempDir::new().expect("failed to create temp dir for test");
    let storage = LocalStorage::new(dir.path());

    let result = panic::catch_unwind(panic::AssertUnwindSafe(|| f(&storage)));

    drop(dir);

    if let Err(err) = result {
        panic::resume_unwind(err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_in_empty_dir_gives_an_empty_storage() {
        run_in_empty_dir(|storage| {
            let root = storage.root().to_path_buf();
            assert!(root.exists());
            assert!(root.read_dir().unwrap().next().is_none());
        });
    }

    #[test]
    #[should_panic(expected = "boom")]
    fn test_run_in_empty_dir_still_cleans_up_on_panic() {
        run_in_empty_dir(|_storage| {
            panic!("boom");
        });
    }
}

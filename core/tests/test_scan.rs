use wc_core::error::WcError;
use wc_core::relpath::RelPath;
use wc_core::store::{Checksum, PropertyMap};
use wc_core_testutils::TestWc;

fn seed_working_added(wc: &TestWc, relpath: &str, parent: &str) {
    wc.root
        .store()
        .unwrap()
        .conn()
        .execute(
            "INSERT INTO working_node (wc_id, local_relpath, parent_relpath, presence, kind)
             VALUES (1, ?1, ?2, 'normal', 'file')",
            rusqlite::params![relpath, parent],
        )
        .unwrap();
}

#[test]
fn scan_base_repos_reports_the_root_coordinates_for_a_plain_nested_file() {
    let wc = TestWc::init_with_repos("http://example.invalid/repo", "uuid-1", "proj/trunk");
    let digest = Checksum::sha1("da39a3ee5e6b4b0d3255bfef95601890afd80709").unwrap();
    wc.working_copy
        .nodes(&wc.root)
        .unwrap()
        .base_add_directory(
            &RelPath::from("dir"),
            None,
            0,
            (0, 0, "a"),
            wc_core::node::Depth::Infinity,
            &PropertyMap::new(),
            &["f.txt".to_owned()],
        )
        .unwrap();
    wc.working_copy
        .nodes(&wc.root)
        .unwrap()
        .base_add_file(&RelPath::from("dir/f.txt"), None, 0, (0, 0, "a"), &digest, 0, &PropertyMap::new())
        .unwrap();

    let handle = wc.open("dir/f.txt");
    let repos = wc.working_copy.scan_base_repos(&handle).unwrap();
    assert_eq!(repos.repos_relpath, "proj/trunk/dir/f.txt");
    assert_eq!(repos.repos_root, "http://example.invalid/repo");
    assert_eq!(repos.repos_uuid, "uuid-1");
}

#[test]
fn scan_addition_walks_up_to_the_copy_operation_root_through_the_facade() {
    let wc = TestWc::init_with_repos("http://example.invalid/repo", "uuid-1", "proj/trunk");
    wc.root
        .store()
        .unwrap()
        .conn()
        .execute(
            "INSERT INTO working_node
                (wc_id, local_relpath, parent_relpath, presence, kind,
                 copyfrom_repos_id, copyfrom_relpath, copyfrom_rev, moved_here)
             VALUES (1, 'copied', '', 'normal', 'dir', 1, 'proj/trunk/orig', 0, 0)",
            [],
        )
        .unwrap();
    seed_working_added(&wc, "copied/child", "copied");

    let handle = wc.open("copied/child");
    let scan = wc.working_copy.scan_addition(&handle).unwrap();
    assert!(scan.is_copy);
    assert!(!scan.moved_here);
    assert_eq!(scan.op_root_path.as_str(), "copied");
    assert_eq!(scan.copyfrom.unwrap().repos_relpath, "proj/trunk/orig");
    assert_eq!(scan.implied.repos_relpath, "proj/trunk/copied/child");
}

#[test]
fn scan_addition_on_an_unadded_path_fails_unexpected_status() {
    let wc = TestWc::init();
    std::fs::create_dir_all(wc.abspath().join("plain")).unwrap();
    let handle = wc.open("plain");
    let err = wc.working_copy.scan_addition(&handle).unwrap_err();
    assert!(matches!(err, WcError::UnexpectedStatus(_)));
}

#[test]
fn scan_deletion_finds_the_working_subtree_deletion_root() {
    let wc = TestWc::init();
    wc.working_copy
        .nodes(&wc.root)
        .unwrap()
        .base_add_directory(
            &RelPath::from("dir"),
            None,
            0,
            (0, 0, "a"),
            wc_core::node::Depth::Infinity,
            &PropertyMap::new(),
            &["c".to_owned()],
        )
        .unwrap();
    let digest = Checksum::sha1("da39a3ee5e6b4b0d3255bfef95601890afd80709").unwrap();
    wc.working_copy
        .nodes(&wc.root)
        .unwrap()
        .base_add_file(&RelPath::from("dir/c"), None, 0, (0, 0, "a"), &digest, 0, &PropertyMap::new())
        .unwrap();

    wc.root
        .store()
        .unwrap()
        .conn()
        .execute(
            "INSERT INTO working_node (wc_id, local_relpath, parent_relpath, presence, kind)
             VALUES (1, 'dir/c', 'dir', 'not-present', 'file')",
            [],
        )
        .unwrap();
    wc.root
        .store()
        .unwrap()
        .conn()
        .execute(
            "INSERT INTO working_node (wc_id, local_relpath, parent_relpath, presence, kind)
             VALUES (1, 'dir', '', 'normal', 'dir')",
            [],
        )
        .unwrap();

    let handle = wc.open("dir/c");
    let scan = wc.working_copy.scan_deletion(&handle).unwrap();
    assert_eq!(scan.work_del_root.as_ref().map(RelPath::as_str), Some("dir/c"));
}

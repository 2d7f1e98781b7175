use std::io::Read;

use wc_core::error::WcError;
use wc_core::pristine::{CheckMode, Presence};
use wc_core::protos::work_queue::{work_item::Action, RemoveFile, SetTimestamp, WorkItem};
use wc_core::store::Checksum;
use wc_core_testutils::TestWc;

fn sha1_of(bytes: &[u8]) -> Checksum {
    use sha1::{Digest, Sha1};
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    Checksum::sha1(hex::encode(hasher.finalize())).unwrap()
}

fn remove_file_item(relpath: &str) -> WorkItem {
    WorkItem {
        action: Some(Action::RemoveFile(RemoveFile {
            relpath: relpath.to_owned(),
        })),
    }
}

#[test]
fn pristine_install_then_read_round_trips_through_the_facade() {
    let wc = TestWc::init();
    let contents = b"some pristine text";
    let digest = sha1_of(contents);

    let tempdir = wc.working_copy.pristine_tempdir(&wc.root).unwrap();
    let temp_path = tempdir.join("staged");
    std::fs::write(&temp_path, contents).unwrap();

    wc.working_copy
        .pristine_install(&wc.root, &temp_path, &digest)
        .unwrap();

    assert_eq!(
        wc.working_copy
            .pristine_check(&wc.root, &digest, CheckMode::Both)
            .unwrap(),
        Presence::Present
    );

    let mut file = wc.working_copy.pristine_read(&wc.root, &digest).unwrap();
    let mut read_back = Vec::new();
    file.read_to_end(&mut read_back).unwrap();
    assert_eq!(read_back, contents);
}

/// Pristine install/read treats content as an opaque byte string: arbitrary
/// binary content, not just ASCII text, round-trips byte-for-byte.
#[test]
fn pristine_install_round_trips_arbitrary_binary_content() {
    let wc = TestWc::init();
    let contents: Vec<u8> = (0..4096).map(|_| rand::random::<u8>()).collect();
    let digest = sha1_of(&contents);

    let tempdir = wc.working_copy.pristine_tempdir(&wc.root).unwrap();
    let temp_path = tempdir.join("staged");
    std::fs::write(&temp_path, &contents).unwrap();

    wc.working_copy
        .pristine_install(&wc.root, &temp_path, &digest)
        .unwrap();

    let mut file = wc.working_copy.pristine_read(&wc.root, &digest).unwrap();
    let mut read_back = Vec::new();
    file.read_to_end(&mut read_back).unwrap();
    assert_eq!(read_back, contents);
}

#[test]
fn pristine_check_reports_absent_for_an_uninstalled_digest() {
    let wc = TestWc::init();
    let digest = Checksum::sha1("0".repeat(40)).unwrap();
    assert_eq!(
        wc.working_copy
            .pristine_check(&wc.root, &digest, CheckMode::Both)
            .unwrap(),
        Presence::Absent
    );
}

#[test]
fn pristine_read_of_a_missing_digest_is_path_not_found() {
    let wc = TestWc::init();
    let digest = Checksum::sha1("1".repeat(40)).unwrap();
    let err = wc.working_copy.pristine_read(&wc.root, &digest).unwrap_err();
    assert!(matches!(err, WcError::PathNotFound));
}

#[test]
fn work_queue_add_fetch_completed_round_trips_through_the_facade() {
    let wc = TestWc::init();
    let id = wc.working_copy.wq_add(&wc.root, &remove_file_item("a/b.txt")).unwrap();

    let (fetched_id, item) = wc.working_copy.wq_fetch(&wc.root).unwrap().unwrap();
    assert_eq!(fetched_id, id);
    assert_eq!(item, remove_file_item("a/b.txt"));

    // fetch peeks, it doesn't remove: replaying after a crash must see the
    // same item again until `wq_completed` is called.
    assert!(wc.working_copy.wq_fetch(&wc.root).unwrap().is_some());

    wc.working_copy.wq_completed(&wc.root, id).unwrap();
    assert_eq!(wc.working_copy.wq_fetch(&wc.root).unwrap(), None);
}

#[test]
fn work_queue_items_replay_in_fifo_order() {
    let wc = TestWc::init();
    let first = wc.working_copy.wq_add(&wc.root, &remove_file_item("a")).unwrap();
    let second_item = WorkItem {
        action: Some(Action::SetTimestamp(SetTimestamp {
            relpath: "b".to_owned(),
            mtime_millis_since_epoch: 1_700_000_000_000,
        })),
    };
    let second = wc.working_copy.wq_add(&wc.root, &second_item).unwrap();
    assert!(second > first);

    let (id, item) = wc.working_copy.wq_fetch(&wc.root).unwrap().unwrap();
    assert_eq!(id, first);
    assert_eq!(item, remove_file_item("a"));
    wc.working_copy.wq_completed(&wc.root, id).unwrap();

    let (id, item) = wc.working_copy.wq_fetch(&wc.root).unwrap().unwrap();
    assert_eq!(id, second);
    assert_eq!(item, second_item);
}

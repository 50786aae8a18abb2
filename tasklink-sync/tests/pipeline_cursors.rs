mod support;

use chrono::Utc;
use tempfile::TempDir;

use support::{init_logging, mirror_task, source_task, FakeMirror, FakeSource, MemoryCursorStore};
use tasklink_core::types::{MirrorId, SyncCursor, Watermark};
use tasklink_sync::{run_pass, PassMode, PassOptions, SyncError};

fn world() -> (FakeSource, FakeMirror, MemoryCursorStore) {
    init_logging();
    let mut source = FakeSource::new();
    let mut mirror = FakeMirror::new();
    source.add_project("p1", "Home", None);
    source.add_task(source_task("t1", "Mow lawn", Some("p1")));
    mirror.add_project("mp9", "Errands");
    mirror.add_task(mirror_task("mt9", "Buy stamps", "mp9"));
    (source, mirror, MemoryCursorStore::default())
}

#[test]
fn successful_pass_advances_all_three_cursors() {
    let (mut source, mut mirror, mut cursors) = world();
    let before = Utc::now();

    let report = run_pass(&mut source, &mut mirror, &mut cursors, &PassOptions::default())
        .expect("pass");

    assert_eq!(cursors.saves, 1);
    assert_eq!(cursors.state.mirror_cursor, mirror.cursor());
    assert!(!cursors.state.mirror_cursor.is_full_resync());
    let floored = Watermark::floor_to_minute(before);
    assert!(cursors.state.task_watermark >= floored);
    assert!(cursors.state.task_watermark.0 <= Utc::now());
    assert_eq!(cursors.state.task_watermark, cursors.state.project_watermark);
    assert_eq!(report.persisted.as_ref(), Some(&cursors.state));
    assert_eq!(report.summary(Utc::now()).created, 4);
}

#[test]
fn failed_commit_keeps_every_cursor() {
    let (mut source, mut mirror, mut cursors) = world();
    mirror.fail_commit = true;

    let err = run_pass(&mut source, &mut mirror, &mut cursors, &PassOptions::default())
        .expect_err("commit must fail");

    assert!(matches!(err, SyncError::Commit(_)), "{err}");
    assert_eq!(cursors.saves, 0);
    assert!(cursors.state.mirror_cursor.is_full_resync());
    assert_eq!(cursors.state.task_watermark, Watermark::beginning());

    // The retry reprocesses the same window and creates exactly once.
    mirror.fail_commit = false;
    run_pass(&mut source, &mut mirror, &mut cursors, &PassOptions::default()).expect("retry");
    assert_eq!(
        mirror
            .projects
            .values()
            .filter(|p| p.name == "Home")
            .count(),
        1
    );
    assert_eq!(cursors.saves, 1);
}

#[test]
fn failed_pulls_are_refetched_from_the_mirror() {
    let (mut source, mut mirror, mut cursors) = world();
    source.read_only = true;

    let first = run_pass(&mut source, &mut mirror, &mut cursors, &PassOptions::default())
        .expect("pass");
    assert_eq!(first.failed(), 2);
    assert_eq!(cursors.state.pending.retry_mirror_projects, vec![MirrorId::from("mp9")]);
    assert_eq!(cursors.state.pending.retry_mirror_tasks, vec![MirrorId::from("mt9")]);

    // The mirror cursor has moved past both records; only the retry finds them.
    source.read_only = false;
    let second = run_pass(&mut source, &mut mirror, &mut cursors, &PassOptions::default())
        .expect("retry");

    assert_eq!(second.failed(), 0);
    let stamps = source.task_by_title("Buy stamps");
    assert_eq!(stamps.mirror_id, Some(MirrorId::from("mt9")));
    let errands = stamps.project.clone().expect("filed under the pulled project");
    assert_eq!(source.projects[&errands].name, "Errands");
    assert!(cursors.state.pending.is_empty());
}

#[test]
fn failed_fetch_is_fatal() {
    let (mut source, mut mirror, mut cursors) = world();
    cursors.state.mirror_cursor = SyncCursor("bogus".into());

    let err = run_pass(&mut source, &mut mirror, &mut cursors, &PassOptions::default())
        .expect_err("fetch must fail");

    match err {
        SyncError::Fetch { what, .. } => assert_eq!(what, "mirror changes"),
        other => panic!("expected fetch error, got {other}"),
    }
    assert!(mirror.commits.is_empty());
    assert_eq!(cursors.saves, 0);
}

#[test]
fn dry_run_decides_but_writes_nothing() {
    let (mut source, mut mirror, mut cursors) = world();
    let options = PassOptions {
        mode: PassMode::DryRun,
        dump_dir: None,
    };

    let report = run_pass(&mut source, &mut mirror, &mut cursors, &options).expect("dry run");

    assert!(report.dry_run);
    assert_eq!(report.created(), 4);
    assert_eq!(report.queued_commands, 2);
    assert_eq!(report.committed_commands, 0);
    assert!(report.persisted.is_none());
    assert!(mirror.commits.is_empty());
    assert!(source.calls.is_empty());
    assert_eq!(cursors.saves, 0);
}

#[test]
fn dumps_snapshot_and_receipt() {
    let (mut source, mut mirror, mut cursors) = world();
    let dumps = TempDir::new().expect("dump dir");
    let options = PassOptions {
        mode: PassMode::Live,
        dump_dir: Some(dumps.path().to_path_buf()),
    };

    run_pass(&mut source, &mut mirror, &mut cursors, &options).expect("pass");

    let mut names: Vec<String> = std::fs::read_dir(dumps.path())
        .expect("read dir")
        .map(|e| e.expect("entry").file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names.len(), 2, "{names:?}");
    assert!(names.iter().any(|n| n.ends_with("-snapshot.json")));
    assert!(names.iter().any(|n| n.ends_with("-receipt.json")));
}

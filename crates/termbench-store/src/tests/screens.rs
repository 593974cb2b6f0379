use termbench_model::{ScreenCreateOpts, ScreenWebShareOpts, UpdateRecord};

use crate::error::StoreError;
use crate::tests::{active_screen_of_active_session, test_core};

#[test]
fn inserted_screens_get_sequential_names_and_indices() {
    let (_dir, core) = test_core();
    let session_id = core.get_active_session_id().expect("active session");

    core.insert_screen(&session_id, "", &ScreenCreateOpts::default(), false)
        .expect("insert s2");
    core.insert_screen(&session_id, "", &ScreenCreateOpts::default(), false)
        .expect("insert s3");

    let screens = core.get_session_screens(&session_id).expect("screens");
    let names: Vec<(&str, i64)> = screens
        .iter()
        .map(|s| (s.name.as_str(), s.screen_idx))
        .collect();
    assert_eq!(names, vec![("s1", 1), ("s2", 2), ("s3", 3)]);
}

#[test]
fn set_screen_idx_reorders_densely() {
    let (_dir, core) = test_core();
    let session_id = core.get_active_session_id().expect("active session");
    core.insert_screen(&session_id, "", &ScreenCreateOpts::default(), false)
        .expect("insert s2");
    core.insert_screen(&session_id, "", &ScreenCreateOpts::default(), false)
        .expect("insert s3");

    let screens = core.get_session_screens(&session_id).expect("screens");
    let s3 = screens.iter().find(|s| s.name == "s3").expect("s3");

    let reordered = core
        .set_screen_idx(&session_id, &s3.screen_id, 1)
        .expect("move s3 to front");
    let order: Vec<(&str, i64)> = reordered
        .iter()
        .map(|s| (s.name.as_str(), s.screen_idx))
        .collect();
    assert_eq!(order, vec![("s3", 1), ("s1", 2), ("s2", 3)]);
}

#[test]
fn archive_refuses_last_screen_and_advances_active() {
    let (_dir, core) = test_core();
    let session_id = core.get_active_session_id().expect("active session");
    let first = active_screen_of_active_session(&core);

    let err = core
        .archive_screen(&session_id, &first.screen_id)
        .expect_err("archiving the only screen should fail");
    assert!(matches!(err, StoreError::Validation(_)));
    assert!(err
        .to_string()
        .contains("cannot archive the last screen in a session"));

    core.insert_screen(&session_id, "", &ScreenCreateOpts::default(), false)
        .expect("insert second screen");
    core.archive_screen(&session_id, &first.screen_id)
        .expect("archive active screen");

    let session = core
        .get_bare_session_by_id(&session_id)
        .expect("load session")
        .expect("session exists");
    assert_ne!(session.active_screen_id, first.screen_id);

    let archived = core
        .get_screen_by_id(&first.screen_id)
        .expect("load screen")
        .expect("screen exists");
    assert!(archived.archived);
    assert_eq!(archived.screen_idx, 0);
}

#[test]
fn unarchive_restores_screen_at_end_of_order() {
    let (_dir, core) = test_core();
    let session_id = core.get_active_session_id().expect("active session");
    let first = active_screen_of_active_session(&core);
    core.insert_screen(&session_id, "", &ScreenCreateOpts::default(), false)
        .expect("insert second screen");

    core.archive_screen(&session_id, &first.screen_id)
        .expect("archive screen");
    core.unarchive_screen(&session_id, &first.screen_id)
        .expect("unarchive screen");

    let restored = core
        .get_screen_by_id(&first.screen_id)
        .expect("load screen")
        .expect("screen exists");
    assert!(!restored.archived);
    assert_eq!(restored.screen_idx, 2);
}

#[test]
fn delete_screen_rejects_unknown_and_last_screen() {
    let (_dir, core) = test_core();
    let missing = termbench_model::ScreenId::generate();
    assert!(core.delete_screen(&missing, false).is_err());

    let screen = active_screen_of_active_session(&core);
    let err = core
        .delete_screen(&screen.screen_id, false)
        .expect_err("deleting the only screen should fail");
    assert!(err
        .to_string()
        .contains("cannot delete the last screen in a session"));
}

#[test]
fn delete_session_cascades_and_leaves_tombstone() {
    let (_dir, core) = test_core();
    let session_id = core.get_active_session_id().expect("active session");
    let screen = active_screen_of_active_session(&core);
    let user_id = termbench_model::UserId::generate();
    core.add_comment_line(&screen.screen_id, &user_id, "hello")
        .expect("add line");

    // a second session takes over as active
    core.insert_session_with_name("other", false)
        .expect("insert second session");

    let update = core.delete_session(&session_id).expect("delete session");
    assert!(update
        .updates
        .iter()
        .any(|record| matches!(record, UpdateRecord::SessionTombstone(t)
            if t.session_id == session_id && t.name == "default")));

    assert!(core
        .get_bare_session_by_id(&session_id)
        .expect("load session")
        .is_none());
    assert!(core
        .get_screen_by_id(&screen.screen_id)
        .expect("load screen")
        .is_none());
    assert!(core
        .get_screen_lines_by_id(&screen.screen_id)
        .expect("load lines")
        .is_none());

    let tombstones = core.get_session_tombstones().expect("tombstones");
    assert_eq!(tombstones.len(), 1);
    assert_eq!(tombstones[0].name, "default");

    let new_active = core.get_active_session_id().expect("active session");
    assert!(!new_active.is_empty());
    assert_ne!(new_active, session_id);
}

#[test]
fn web_shared_screen_records_pty_pos_and_refuses_archive() {
    let (_dir, core) = test_core();
    let session_id = core.get_active_session_id().expect("active session");
    let screen = active_screen_of_active_session(&core);
    core.insert_screen(&session_id, "", &ScreenCreateOpts::default(), false)
        .expect("insert second screen");

    core.screen_web_share_start(
        &screen.screen_id,
        &ScreenWebShareOpts {
            share_name: "demo".to_owned(),
            view_key: "k".to_owned(),
        },
    )
    .expect("start web share");

    let line_id = termbench_model::LineId::generate();
    core.pty_files()
        .create_cmd_pty_file(&screen.screen_id, &line_id, 64 * 1024)
        .expect("create pty file");
    core.append_to_cmd_pty_blob(&screen.screen_id, &line_id, &[b'x'; 1024], 0)
        .expect("append pty data");

    let updates = core.get_screen_updates(1000).expect("screen updates");
    assert!(updates.iter().any(|u| {
        u.kind == termbench_model::ScreenUpdateKind::PtyPos
            && u.screen_id == screen.screen_id
            && u.line_id == line_id
    }));

    let err = core
        .archive_screen(&session_id, &screen.screen_id)
        .expect_err("archiving a web-shared screen should fail");
    assert!(err.to_string().contains("stop web-sharing before"));

    core.screen_web_share_stop(&screen.screen_id)
        .expect("stop web share");
    core.archive_screen(&session_id, &screen.screen_id)
        .expect("archive after unsharing");
}

#[test]
fn fixup_selected_line_snaps_to_closest_neighbor() {
    let (_dir, core) = test_core();
    let screen = active_screen_of_active_session(&core);
    let user_id = termbench_model::UserId::generate();

    let lines: Vec<_> = (0..3)
        .map(|idx| {
            core.add_comment_line(&screen.screen_id, &user_id, &format!("line {idx}"))
                .expect("add line")
        })
        .collect();

    let edit = termbench_model::ScreenEdit {
        selected_line: Some(lines[1].line_num),
        ..Default::default()
    };
    core.update_screen(&screen.screen_id, &edit)
        .expect("select middle line");

    core.delete_lines_by_ids(&screen.screen_id, &[lines[1].line_id.clone()])
        .expect("delete selected line");

    let fixed = core
        .fixup_screen_selected_line(&screen.screen_id)
        .expect("fixup")
        .expect("selected line should have moved");
    assert_eq!(fixed.selected_line, lines[2].line_num);
}

#[test]
fn switch_screen_replays_mem_state() {
    let (_dir, core) = test_core();
    let session_id = core.get_active_session_id().expect("active session");
    let update = core
        .insert_screen(&session_id, "", &ScreenCreateOpts::default(), false)
        .expect("insert second screen");
    let new_screen_id = update
        .updates
        .iter()
        .find_map(|record| match record {
            UpdateRecord::Screen(screen) => Some(screen.screen_id.clone()),
            _ => None,
        })
        .expect("screen record");

    let packet = core
        .switch_screen(&session_id, &new_screen_id)
        .expect("switch screen");
    assert!(packet
        .updates
        .iter()
        .any(|record| matches!(record, UpdateRecord::ActiveSessionId(_))));
    assert!(packet
        .updates
        .iter()
        .any(|record| matches!(record, UpdateRecord::CmdLine(_))));

    let session = core
        .get_bare_session_by_id(&session_id)
        .expect("load session")
        .expect("session exists");
    assert_eq!(session.active_screen_id, new_screen_id);
}

#[test]
fn screen_reset_drops_shell_instances() {
    let (_dir, core) = test_core();
    let session_id = core.get_active_session_id().expect("active session");
    let screen = active_screen_of_active_session(&core);
    let local = core
        .get_local_remote()
        .expect("local remote")
        .expect("local remote exists");
    let remote_ptr = termbench_model::RemotePtr::new(local.remote_id);

    let state = termbench_model::ShellState {
        version: "bash v5.2.15".to_owned(),
        cwd: "/home/user".to_owned(),
        ..Default::default()
    };
    core.update_remote_state(
        &session_id,
        &screen.screen_id,
        &remote_ptr,
        Default::default(),
        Some(&state),
        None,
    )
    .expect("record instance state");

    let removed = core.screen_reset(&screen.screen_id).expect("reset screen");
    assert_eq!(removed.len(), 1);
    assert!(removed[0].remove);
    assert!(core
        .get_remote_instance(&session_id, &screen.screen_id, &remote_ptr)
        .expect("lookup instance")
        .is_none());
}

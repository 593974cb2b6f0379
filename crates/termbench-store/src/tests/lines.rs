use termbench_model::{
    Cmd, CmdDoneInfo, CmdStatus, Line, LineId, StatusIndicatorLevel, UpdatePacket, UpdateRecord,
    UserId, MAX_LINE_STATE_SIZE,
};

use crate::error::StoreError;
use crate::tests::{active_screen_of_active_session, test_core};

#[test]
fn line_numbers_are_dense_monotonic_and_never_reused() {
    let (_dir, core) = test_core();
    let screen = active_screen_of_active_session(&core);
    let user_id = UserId::generate();

    let lines: Vec<_> = (0..3)
        .map(|idx| {
            core.add_comment_line(&screen.screen_id, &user_id, &format!("line {idx}"))
                .expect("add line")
        })
        .collect();
    assert_eq!(
        lines.iter().map(|l| l.line_num).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );

    core.delete_lines_by_ids(&screen.screen_id, &[lines[1].line_id.clone()])
        .expect("delete middle line");

    let remaining = core
        .get_screen_lines_by_id(&screen.screen_id)
        .expect("load lines")
        .expect("screen exists");
    let nums: Vec<i64> = remaining.lines.iter().map(|l| l.line_num).collect();
    assert_eq!(nums, vec![1, 3]);

    let next = core
        .add_comment_line(&screen.screen_id, &user_id, "after delete")
        .expect("add line");
    assert_eq!(next.line_num, 4);

    // strictly increasing across arbitrary delete interleavings
    core.delete_lines_by_ids(&screen.screen_id, &[lines[0].line_id.clone()])
        .expect("delete first line");
    let another = core
        .add_comment_line(&screen.screen_id, &user_id, "later")
        .expect("add line");
    assert_eq!(another.line_num, 5);
}

#[test]
fn insert_line_validates_inputs() {
    let (_dir, core) = test_core();
    let screen = active_screen_of_active_session(&core);
    let user_id = UserId::generate();

    let mut no_id = Line::new_text(screen.screen_id.clone(), user_id.clone(), "x");
    no_id.line_id = LineId::new("");
    assert!(core.insert_line(&mut no_id, None).is_err());

    let mut preset_num = Line::new_text(screen.screen_id.clone(), user_id.clone(), "x");
    preset_num.line_num = 7;
    assert!(core.insert_line(&mut preset_num, None).is_err());

    let mut bad_screen = Line::new_text(termbench_model::ScreenId::generate(), user_id, "x");
    let err = core
        .insert_line(&mut bad_screen, None)
        .expect_err("unknown screen should fail");
    assert!(err.to_string().contains("screen not found"));
}

#[test]
fn oversized_line_state_is_rejected() {
    let (_dir, core) = test_core();
    let screen = active_screen_of_active_session(&core);
    let user_id = UserId::generate();

    let mut state = termbench_model::LineState::new();
    state.insert(
        "blob".to_owned(),
        serde_json::Value::String("x".repeat(MAX_LINE_STATE_SIZE)),
    );
    let mut line = Line::new_cmd(
        screen.screen_id.clone(),
        user_id,
        LineId::generate(),
        "",
        Some(state),
    );
    let err = core
        .insert_line(&mut line, None)
        .expect_err("oversized line state should fail");
    assert!(err.to_string().contains("linestate exceeds maxsize"));
}

#[test]
fn running_cmd_blocks_line_deletion() {
    let (_dir, core) = test_core();
    let screen = active_screen_of_active_session(&core);
    let user_id = UserId::generate();

    let cmd = Cmd {
        screen_id: screen.screen_id.clone(),
        line_id: LineId::generate(),
        cmd_str: "sleep 60".to_owned(),
        status: CmdStatus::Running,
        ..Cmd::default()
    };
    let line = core
        .add_cmd_line(&screen.screen_id, &user_id, &cmd, "", None)
        .expect("insert running cmd line");

    let err = core
        .delete_lines_by_ids(&screen.screen_id, &[line.line_id.clone()])
        .expect_err("deleting a running line should fail");
    assert!(matches!(err, StoreError::CmdRunning(_)));

    // finish the command, then deletion goes through
    let mut update = UpdatePacket::new();
    core.update_cmd_done_info(
        &mut update,
        &screen.screen_id,
        &line.line_id,
        &CmdDoneInfo {
            ts: termbench_model::now_ms(),
            exit_code: 0,
            duration_ms: 12,
        },
        CmdStatus::Done,
    )
    .expect("mark cmd done");
    core.delete_lines_by_ids(&screen.screen_id, &[line.line_id])
        .expect("delete finished line");
}

#[test]
fn cmd_done_info_updates_row_indicator_and_counter() {
    let (_dir, core) = test_core();
    let session_id = core.get_active_session_id().expect("active session");
    // use a non-active screen so the indicator is not suppressed
    let update = core
        .insert_screen(&session_id, "", &Default::default(), false)
        .expect("insert screen");
    let screen_id = update
        .updates
        .iter()
        .find_map(|record| match record {
            UpdateRecord::Screen(screen) => Some(screen.screen_id.clone()),
            _ => None,
        })
        .expect("screen record");
    let user_id = UserId::generate();

    let cmd = Cmd {
        screen_id: screen_id.clone(),
        line_id: LineId::generate(),
        cmd_str: "false".to_owned(),
        status: CmdStatus::Running,
        ..Cmd::default()
    };
    let line = core
        .add_cmd_line(&screen_id, &user_id, &cmd, "", None)
        .expect("insert running cmd line");
    core.increment_num_running_cmds(&screen_id, 1);

    let mut update = UpdatePacket::new();
    core.update_cmd_done_info(
        &mut update,
        &screen_id,
        &line.line_id,
        &CmdDoneInfo {
            ts: termbench_model::now_ms(),
            exit_code: 3,
            duration_ms: 40,
        },
        CmdStatus::Error,
    )
    .expect("record done info");

    let reloaded = core
        .get_cmd_by_screen_id(&screen_id, &line.line_id)
        .expect("load cmd")
        .expect("cmd exists");
    assert_eq!(reloaded.status, CmdStatus::Error);
    assert_eq!(reloaded.exit_code, 3);
    assert_eq!(reloaded.duration_ms, 40);
    assert!(reloaded.done_ts > 0);

    assert!(update
        .updates
        .iter()
        .any(|record| matches!(record, UpdateRecord::Cmd(c) if c.line_id == line.line_id)));
    assert!(update.updates.iter().any(|record| matches!(
        record,
        UpdateRecord::ScreenStatusIndicator(ind) if ind.status == StatusIndicatorLevel::Error
    )));
    assert!(update.updates.iter().any(|record| matches!(
        record,
        UpdateRecord::ScreenNumRunningCommands(num) if num.num == 0
    )));
}

#[test]
fn cmd_restart_resets_exit_state() {
    let (_dir, core) = test_core();
    let screen = active_screen_of_active_session(&core);
    let user_id = UserId::generate();
    let cmd = Cmd {
        screen_id: screen.screen_id.clone(),
        line_id: LineId::generate(),
        cmd_str: "make".to_owned(),
        status: CmdStatus::Done,
        exit_code: 2,
        duration_ms: 900,
        ..Cmd::default()
    };
    let line = core
        .add_cmd_line(&screen.screen_id, &user_id, &cmd, "", None)
        .expect("insert cmd line");

    let restart_ts = termbench_model::now_ms();
    core.update_cmd_for_restart(
        &screen.screen_id,
        &line.line_id,
        restart_ts,
        111,
        222,
        &termbench_model::TermOpts {
            rows: 30,
            cols: 100,
            ..Default::default()
        },
    )
    .expect("restart cmd");

    let reloaded = core
        .get_cmd_by_screen_id(&screen.screen_id, &line.line_id)
        .expect("load cmd")
        .expect("cmd exists");
    assert_eq!(reloaded.status, CmdStatus::Running);
    assert_eq!(reloaded.exit_code, 0);
    assert_eq!(reloaded.duration_ms, 0);
    assert_eq!(reloaded.restart_ts, restart_ts);
    assert_eq!(reloaded.cmd_pid, 111);
    assert_eq!(reloaded.term_opts.rows, 30);
    assert_eq!(reloaded.orig_term_opts.cols, 100);
}

#[test]
fn find_line_id_by_arg_resolves_all_forms() {
    let (_dir, core) = test_core();
    let screen = active_screen_of_active_session(&core);
    let user_id = UserId::generate();
    let first = core
        .add_comment_line(&screen.screen_id, &user_id, "one")
        .expect("add line");
    let last = core
        .add_comment_line(&screen.screen_id, &user_id, "two")
        .expect("add line");

    let by_last = core
        .find_line_id_by_arg(&screen.screen_id, "E")
        .expect("resolve E");
    assert_eq!(by_last.as_ref(), Some(&last.line_id));

    let by_num = core
        .find_line_id_by_arg(&screen.screen_id, "1")
        .expect("resolve by number");
    assert_eq!(by_num.as_ref(), Some(&first.line_id));

    let prefix = &first.line_id.as_str()[..8];
    let by_prefix = core
        .find_line_id_by_arg(&screen.screen_id, prefix)
        .expect("resolve by prefix");
    assert_eq!(by_prefix.as_ref(), Some(&first.line_id));

    let by_id = core
        .find_line_id_by_arg(&screen.screen_id, last.line_id.as_str())
        .expect("resolve by id");
    assert_eq!(by_id.as_ref(), Some(&last.line_id));

    assert!(core
        .find_line_id_by_arg(&screen.screen_id, "99")
        .expect("resolve missing")
        .is_none());
}

#[test]
fn archive_screen_lines_skips_running_cmds() {
    let (_dir, core) = test_core();
    let screen = active_screen_of_active_session(&core);
    let user_id = UserId::generate();

    core.add_comment_line(&screen.screen_id, &user_id, "plain")
        .expect("add text line");
    let running = Cmd {
        screen_id: screen.screen_id.clone(),
        line_id: LineId::generate(),
        cmd_str: "top".to_owned(),
        status: CmdStatus::Running,
        ..Cmd::default()
    };
    core.add_cmd_line(&screen.screen_id, &user_id, &running, "", None)
        .expect("add running cmd line");

    core.archive_screen_lines(&screen.screen_id)
        .expect("archive lines");

    let lines = core
        .get_screen_lines_by_id(&screen.screen_id)
        .expect("load lines")
        .expect("screen exists");
    let archived: Vec<bool> = lines.lines.iter().map(|l| l.archived).collect();
    assert_eq!(archived, vec![true, false]);
}

#[test]
fn history_keeps_cmd_text_after_line_delete() {
    let (_dir, core) = test_core();
    let session_id = core.get_active_session_id().expect("active session");
    let screen = active_screen_of_active_session(&core);
    let user_id = UserId::generate();

    let cmd = Cmd {
        screen_id: screen.screen_id.clone(),
        line_id: LineId::generate(),
        cmd_str: "ls -la".to_owned(),
        status: CmdStatus::Done,
        ..Cmd::default()
    };
    let line = core
        .add_cmd_line(&screen.screen_id, &user_id, &cmd, "", None)
        .expect("add cmd line");
    core.insert_history_item(&crate::history::HistoryItem::new(
        session_id,
        screen.screen_id.clone(),
        line.line_id.clone(),
        line.line_num,
        "ls -la",
    ))
    .expect("insert history");

    core.delete_lines_by_ids(&screen.screen_id, &[line.line_id])
        .expect("delete line");

    let history = core
        .get_history_for_screen(&screen.screen_id)
        .expect("load history");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].cmd_str, "ls -la");
    assert!(history[0].line_id.is_empty());
    assert_eq!(history[0].line_num, 0);
}

use termbench_model::{DEFAULT_SESSION_NAME, LOCAL_REMOTE_ALIAS, SUDO_REMOTE_ALIAS};

use crate::tests::{active_screen_of_active_session, test_core};

#[test]
fn fresh_store_creates_client_remotes_and_default_session() {
    let (_dir, core) = test_core();

    let client = core
        .get_client_data()
        .expect("load client")
        .expect("client row exists");
    assert!(!client.client_id.is_empty());
    assert!(!client.user_id.is_empty());
    assert!(!client.user_public_key.is_empty());
    assert!(!client.user_private_key.is_empty());
    assert_ne!(client.user_public_key, client.user_private_key);

    let remotes = core.get_all_remotes().expect("load remotes");
    assert_eq!(remotes.len(), 2);
    let local = remotes
        .iter()
        .find(|r| r.remote_alias == LOCAL_REMOTE_ALIAS)
        .expect("local remote");
    let sudo = remotes
        .iter()
        .find(|r| r.remote_alias == SUDO_REMOTE_ALIAS)
        .expect("sudo remote");
    assert!(local.local);
    assert!(sudo.local);
    assert!(!local.is_sudo());
    assert!(sudo.is_sudo());

    let sessions = core.get_bare_sessions().expect("load sessions");
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].name, DEFAULT_SESSION_NAME);
    assert_eq!(sessions[0].session_idx, 1);

    let active_session_id = core.get_active_session_id().expect("active session id");
    assert_eq!(active_session_id, sessions[0].session_id);
    assert!(!sessions[0].active_screen_id.is_empty());

    let screen = active_screen_of_active_session(&core);
    assert_eq!(screen.name, "s1");
    assert_eq!(screen.screen_idx, 1);
    assert_eq!(screen.next_line_num, 1);

    core.shutdown();
}

#[test]
fn bootstrap_is_idempotent() {
    let (_dir, core) = test_core();
    // a second pass must not create duplicate rows
    core.ensure_client_data().expect("ensure client again");
    core.ensure_local_remote().expect("ensure remotes again");
    core.ensure_one_session().expect("ensure session again");

    assert_eq!(core.get_all_remotes().expect("remotes").len(), 2);
    assert_eq!(core.get_bare_sessions().expect("sessions").len(), 1);
    core.shutdown();
}

#[test]
fn session_names_are_uniqued() {
    let (_dir, core) = test_core();
    core.insert_session_with_name("default", false)
        .expect("insert duplicate-named session");
    let sessions = core.get_bare_sessions().expect("sessions");
    let names: Vec<&str> = sessions.iter().map(|s| s.name.as_str()).collect();
    assert!(names.contains(&"default"));
    assert!(names.contains(&"default-2"));
    core.shutdown();
}

#[test]
fn hangup_recovery_marks_running_cmds() {
    let (_dir, core) = test_core();
    let screen = active_screen_of_active_session(&core);

    let mut cmd = termbench_model::Cmd {
        screen_id: screen.screen_id.clone(),
        line_id: termbench_model::LineId::generate(),
        status: termbench_model::CmdStatus::Running,
        ..termbench_model::Cmd::default()
    };
    cmd.cmd_str = "sleep 1000".to_owned();
    core.add_cmd_line(
        &screen.screen_id,
        &termbench_model::UserId::generate(),
        &cmd,
        "",
        None,
    )
    .expect("insert running cmd line");

    core.hangup_all_running_cmds().expect("hangup recovery");
    let reloaded = core
        .get_cmd_by_screen_id(&screen.screen_id, &cmd.line_id)
        .expect("load cmd")
        .expect("cmd exists");
    assert_eq!(reloaded.status, termbench_model::CmdStatus::Hangup);
    core.shutdown();
}

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use termbench_model::{ScreenUpdateKind, ScreenUpdateRow, ScreenWebShareOpts, UserId};

use crate::error::StoreError;
use crate::tests::{active_screen_of_active_session, test_core};
use crate::update_log::UpdateDispatcher;

fn share_active_screen(core: &crate::Core) -> termbench_model::Screen {
    let screen = active_screen_of_active_session(core);
    core.screen_web_share_start(
        &screen.screen_id,
        &ScreenWebShareOpts {
            share_name: "shared".to_owned(),
            view_key: "k".to_owned(),
        },
    )
    .expect("start web share");
    screen
}

#[test]
fn line_new_then_line_del_coalesces_to_single_del_row() {
    let (_dir, core) = test_core();
    let screen = share_active_screen(&core);
    let user_id = UserId::generate();

    let line = core
        .add_comment_line(&screen.screen_id, &user_id, "short lived")
        .expect("add line");
    core.delete_lines_by_ids(&screen.screen_id, &[line.line_id.clone()])
        .expect("delete line");

    let rows: Vec<ScreenUpdateRow> = core
        .get_screen_updates(1000)
        .expect("screen updates")
        .into_iter()
        .filter(|row| row.line_id == line.line_id)
        .collect();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].kind, ScreenUpdateKind::LineDel);
}

#[test]
fn line_new_implies_a_paired_pty_pos_row() {
    let (_dir, core) = test_core();
    let screen = share_active_screen(&core);
    let user_id = UserId::generate();

    let line = core
        .add_comment_line(&screen.screen_id, &user_id, "visible")
        .expect("add line");

    let kinds: Vec<ScreenUpdateKind> = core
        .get_screen_updates(1000)
        .expect("screen updates")
        .into_iter()
        .filter(|row| row.line_id == line.line_id)
        .map(|row| row.kind)
        .collect();
    assert_eq!(kinds, vec![ScreenUpdateKind::LineNew, ScreenUpdateKind::PtyPos]);
}

#[test]
fn unshared_screens_write_no_update_rows() {
    let (_dir, core) = test_core();
    let screen = active_screen_of_active_session(&core);
    let user_id = UserId::generate();
    core.add_comment_line(&screen.screen_id, &user_id, "local only")
        .expect("add line");
    assert_eq!(core.count_screen_updates().expect("count"), 0);
}

#[test]
fn remove_screen_updates_deletes_by_id() {
    let (_dir, core) = test_core();
    let screen = share_active_screen(&core);
    let user_id = UserId::generate();
    core.add_comment_line(&screen.screen_id, &user_id, "one")
        .expect("add line");

    let rows = core.get_screen_updates(1000).expect("screen updates");
    assert!(!rows.is_empty());
    let ids: Vec<i64> = rows.iter().map(|row| row.update_id).collect();
    core.remove_screen_updates(&ids).expect("remove updates");
    assert_eq!(core.count_screen_updates().expect("count"), 0);
}

#[derive(Default)]
struct CollectingDispatcher {
    seen: Mutex<Vec<ScreenUpdateRow>>,
}

impl UpdateDispatcher for CollectingDispatcher {
    fn dispatch(&self, update: &ScreenUpdateRow) -> Result<(), StoreError> {
        self.seen
            .lock()
            .expect("dispatcher lock poisoned in test")
            .push(update.clone());
        Ok(())
    }
}

#[test]
fn update_writer_drains_rows_to_the_dispatcher() {
    let (_dir, core) = test_core();
    let dispatcher = Arc::new(CollectingDispatcher::default());
    core.start_update_writer(dispatcher.clone())
        .expect("start update writer");
    assert!(core.start_update_writer(dispatcher.clone()).is_err());

    let screen = share_active_screen(&core);
    let user_id = UserId::generate();
    let line = core
        .add_comment_line(&screen.screen_id, &user_id, "dispatched")
        .expect("add line");

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let drained = core.count_screen_updates().expect("count") == 0;
        let seen = dispatcher
            .seen
            .lock()
            .expect("dispatcher lock poisoned in test")
            .iter()
            .any(|row| row.line_id == line.line_id && row.kind == ScreenUpdateKind::LineNew);
        if drained && seen {
            break;
        }
        assert!(
            Instant::now() < deadline,
            "update writer never drained the log"
        );
        std::thread::sleep(Duration::from_millis(10));
    }

    core.stop_update_writer();
    // restart after stop works
    core.start_update_writer(dispatcher).expect("restart writer");
    core.stop_update_writer();
}

#[test]
fn web_pty_pos_rows_upsert_and_delete() {
    let (_dir, core) = test_core();
    let screen = active_screen_of_active_session(&core);
    let line_id = termbench_model::LineId::generate();

    assert_eq!(
        core.get_web_pty_pos(&screen.screen_id, &line_id).expect("get"),
        0
    );
    core.set_web_pty_pos(&screen.screen_id, &line_id, 100)
        .expect("set");
    core.set_web_pty_pos(&screen.screen_id, &line_id, 250)
        .expect("overwrite");
    assert_eq!(
        core.get_web_pty_pos(&screen.screen_id, &line_id).expect("get"),
        250
    );
    core.delete_web_pty_pos(&screen.screen_id, &line_id)
        .expect("delete");
    assert_eq!(
        core.get_web_pty_pos(&screen.screen_id, &line_id).expect("get"),
        0
    );
}

#[test]
fn stopping_web_share_clears_queued_updates() {
    let (_dir, core) = test_core();
    let screen = share_active_screen(&core);
    let user_id = UserId::generate();
    core.add_comment_line(&screen.screen_id, &user_id, "queued")
        .expect("add line");
    assert!(core.count_screen_updates().expect("count") > 0);

    core.screen_web_share_stop(&screen.screen_id)
        .expect("stop web share");
    assert_eq!(core.count_screen_updates().expect("count"), 0);
}

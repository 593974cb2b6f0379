use crate::lifecycle::Core;

mod bootstrap;
mod lines;
mod screens;
mod state_chain;
mod update_log;

pub(crate) fn test_core() -> (tempfile::TempDir, Core) {
    let dir = tempfile::tempdir().expect("tempdir");
    let core = Core::open_in_memory(dir.path()).expect("open core");
    core.bootstrap().expect("bootstrap core");
    (dir, core)
}

pub(crate) fn active_screen_of_active_session(core: &Core) -> termbench_model::Screen {
    let session_id = core.get_active_session_id().expect("active session id");
    let session = core
        .get_bare_session_by_id(&session_id)
        .expect("load session")
        .expect("session exists");
    core.get_screen_by_id(&session.active_screen_id)
        .expect("load screen")
        .expect("screen exists")
}

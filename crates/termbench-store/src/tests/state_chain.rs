use std::collections::BTreeMap;

use termbench_model::{
    apply_shell_state_diff, ShellState, ShellStateDiff, ShellStatePtr, VarDiffOp,
};

use crate::tests::test_core;

fn base_state() -> ShellState {
    let mut vars = BTreeMap::new();
    vars.insert("HOME".to_owned(), "/home/user".to_owned());
    vars.insert("SHELL".to_owned(), "/bin/bash".to_owned());
    ShellState {
        version: "bash v5.2.15".to_owned(),
        cwd: "/home/user".to_owned(),
        vars,
        aliases: String::new(),
        funcs: String::new(),
    }
}

fn diff_against(base_hash: &str, preds: Vec<String>, cwd: &str, var: (&str, &str)) -> ShellStateDiff {
    ShellStateDiff {
        version: "bash v5.2.15".to_owned(),
        base_hash: base_hash.to_owned(),
        diff_hash_arr: preds,
        cwd: Some(cwd.to_owned()),
        var_ops: vec![VarDiffOp::Set {
            name: var.0.to_owned(),
            value: var.1.to_owned(),
        }],
        aliases: None,
        funcs: None,
    }
}

#[test]
fn state_bases_are_stored_idempotently() {
    let (_dir, core) = test_core();
    let state = base_state();
    let hash_a = core.store_state_base(&state).expect("store base");
    let hash_b = core.store_state_base(&state).expect("store base again");
    assert_eq!(hash_a, hash_b);
    assert_eq!(core.get_state_base(&hash_a).expect("load base"), state);
    assert_eq!(
        core.get_state_base_version(&hash_a).expect("base version"),
        "bash v5.2.15"
    );
}

#[test]
fn full_state_resolution_folds_the_diff_chain() {
    let (_dir, core) = test_core();
    let base = base_state();
    let base_hash = core.store_state_base(&base).expect("store base");

    let d1 = diff_against(&base_hash, vec![], "/srv", ("STEP", "one"));
    let d1_hash = core.store_state_diff(&d1).expect("store d1");

    let d2 = diff_against(&base_hash, vec![d1_hash.clone()], "/srv/app", ("STEP", "two"));
    let d2_hash = core.store_state_diff(&d2).expect("store d2");

    let ptr = ShellStatePtr {
        base_hash: base_hash.clone(),
        diff_hash_arr: vec![d1_hash, d2_hash.clone()],
    };
    let resolved = core.get_full_state(&ptr).expect("resolve chain");

    let expected = apply_shell_state_diff(&apply_shell_state_diff(&base, &d1), &d2);
    assert_eq!(resolved, expected);
    assert_eq!(resolved.cwd, "/srv/app");
    assert_eq!(resolved.vars.get("STEP").map(String::as_str), Some("two"));

    // the current diff of the pointer is the final chain element
    let cur = core.get_cur_state_diff_from_ptr(&ptr).expect("cur diff");
    assert_eq!(cur, d2);
}

#[test]
fn storing_a_diff_with_missing_predecessor_fails() {
    let (_dir, core) = test_core();
    let base_hash = core.store_state_base(&base_state()).expect("store base");

    let d1 = diff_against(&base_hash, vec![], "/srv", ("STEP", "one"));
    let (d1_hash, _) = d1.encode_and_hash();
    // note: d1 itself is never stored
    let d2 = diff_against(&base_hash, vec![d1_hash.clone()], "/srv/app", ("STEP", "two"));

    let err = core
        .store_state_diff(&d2)
        .expect_err("missing predecessor should fail");
    assert!(err
        .to_string()
        .contains(&format!("diffhash[0]:{d1_hash} does not exist")));
}

#[test]
fn storing_a_diff_with_missing_base_fails() {
    let (_dir, core) = test_core();
    let diff = diff_against("feedfacecafebeef", vec![], "/srv", ("STEP", "one"));
    let err = core
        .store_state_diff(&diff)
        .expect_err("missing base should fail");
    assert!(err.to_string().contains("does not exist"));
}

#[test]
fn resolving_a_pointer_with_missing_rows_is_corruption() {
    let (_dir, core) = test_core();
    let err = core
        .get_full_state(&ShellStatePtr::new("feedfacecafebeef"))
        .expect_err("missing base should fail");
    assert!(matches!(err, crate::error::StoreError::Corruption(_)));
}

#[test]
fn empty_chain_yields_empty_diff_with_base_version() {
    let (_dir, core) = test_core();
    let base_hash = core.store_state_base(&base_state()).expect("store base");
    let cur = core
        .get_cur_state_diff_from_ptr(&ShellStatePtr::new(base_hash.clone()))
        .expect("cur diff");
    assert_eq!(cur.version, "bash v5.2.15");
    assert_eq!(cur.base_hash, base_hash);
    assert!(cur.diff_hash_arr.is_empty());
    assert!(cur.var_ops.is_empty());
}

#[test]
fn remote_state_updates_upsert_the_instance() {
    let (_dir, core) = test_core();
    let session_id = core.get_active_session_id().expect("active session");
    let session = core
        .get_bare_session_by_id(&session_id)
        .expect("load session")
        .expect("session exists");
    let screen_id = session.active_screen_id.clone();
    let local = core
        .get_local_remote()
        .expect("local remote")
        .expect("local remote exists");
    let remote_ptr = termbench_model::RemotePtr::new(local.remote_id);

    // exactly one of base/diff is required
    assert!(core
        .update_remote_state(&session_id, &screen_id, &remote_ptr, Default::default(), None, None)
        .is_err());

    let base = base_state();
    let instance = core
        .update_remote_state(
            &session_id,
            &screen_id,
            &remote_ptr,
            termbench_model::fe_state_from_shell_state(&base),
            Some(&base),
            None,
        )
        .expect("record base state");
    assert_eq!(instance.shell_type, "bash");
    assert!(instance.state_ptr.diff_hash_arr.is_empty());
    let base_hash = instance.state_ptr.base_hash.clone();

    let diff = diff_against(&base_hash, vec![], "/srv", ("STEP", "one"));
    let updated = core
        .update_remote_state(
            &session_id,
            &screen_id,
            &remote_ptr,
            Default::default(),
            None,
            Some(&diff),
        )
        .expect("record diff state");
    assert_eq!(updated.ri_id, instance.ri_id);
    assert_eq!(updated.state_ptr.base_hash, base_hash);
    assert_eq!(updated.state_ptr.diff_hash_arr.len(), 1);

    let resolved = core
        .get_full_state(&updated.state_ptr)
        .expect("resolve instance state");
    assert_eq!(resolved.cwd, "/srv");
}

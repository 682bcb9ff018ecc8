use std::sync::{Arc, Mutex};
use tbsync::hooks::PreHook;
use tbsync::{DispatchTable, HookError, HookTarget, SummaryCall, SummaryHookRegistry};

fn scalar(tag: &str) -> SummaryCall {
    SummaryCall::Scalar {
        tag: tag.to_string(),
        value: 1.0,
        step: Some(0),
        wall_time: None,
    }
}

fn recording_table(log: &Arc<Mutex<Vec<String>>>) -> Arc<DispatchTable> {
    let table = Arc::new(DispatchTable::new());
    for target in [HookTarget::AddScalar, HookTarget::AddText] {
        let log = Arc::clone(log);
        table.register(target, move |call: &SummaryCall| {
            log.lock().unwrap().push(format!("original {}", call.kind()));
            Ok(())
        });
    }
    table
}

fn recording_pre(log: &Arc<Mutex<Vec<String>>>, label: &str) -> PreHook {
    let log = Arc::clone(log);
    let label = label.to_string();
    Arc::new(move |target: HookTarget, _call: &SummaryCall| {
        log.lock().unwrap().push(format!("{label} {target}"));
    })
}

#[test]
fn unregistered_targets_are_reported() {
    let table = DispatchTable::new();
    assert!(matches!(
        table.call(HookTarget::AddScalar, &scalar("loss")),
        Err(HookError::Unregistered(HookTarget::AddScalar))
    ));
}

#[test]
fn pre_hook_runs_before_the_original() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let table = recording_table(&log);
    let mut registry = SummaryHookRegistry::new(Arc::clone(&table));
    let wrapped = registry.install(
        [HookTarget::AddScalar, HookTarget::AddGraph],
        recording_pre(&log, "mirror"),
    );
    assert_eq!(wrapped, vec![HookTarget::AddScalar]);
    assert!(table.is_hooked(HookTarget::AddScalar));
    assert!(!table.is_hooked(HookTarget::AddText));

    table.call(HookTarget::AddScalar, &scalar("loss")).unwrap();
    table.call(HookTarget::AddText, &scalar("loss")).unwrap();
    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "mirror SummaryWriter.add_scalar",
            "original scalar",
            "original scalar",
        ]
    );
}

#[test]
fn second_registry_leaves_hooked_targets_alone() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let table = recording_table(&log);
    let mut first = SummaryHookRegistry::new(Arc::clone(&table));
    let mut second = SummaryHookRegistry::new(Arc::clone(&table));
    first.install([HookTarget::AddScalar], recording_pre(&log, "first"));
    let wrapped = second.install(
        [HookTarget::AddScalar, HookTarget::AddText],
        recording_pre(&log, "second"),
    );
    assert_eq!(wrapped, vec![HookTarget::AddText]);

    table.call(HookTarget::AddScalar, &scalar("loss")).unwrap();
    let calls = log.lock().unwrap().clone();
    assert_eq!(calls, vec!["first SummaryWriter.add_scalar", "original scalar"]);
}

#[test]
fn restore_puts_originals_back() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let table = recording_table(&log);
    let mut registry = SummaryHookRegistry::new(Arc::clone(&table));
    registry.install(
        [HookTarget::AddScalar, HookTarget::AddText],
        recording_pre(&log, "mirror"),
    );
    assert_eq!(table.hooked_targets().len(), 2);
    assert_eq!(registry.restore(), 2);
    assert_eq!(registry.restore(), 0);
    assert!(registry.is_empty());
    assert!(table.hooked_targets().is_empty());

    table.call(HookTarget::AddScalar, &scalar("loss")).unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["original scalar"]);
    assert_eq!(table.targets(), vec![HookTarget::AddScalar, HookTarget::AddText]);
}

#[test]
fn original_errors_still_surface_after_hooking() {
    let table = Arc::new(DispatchTable::new());
    table.register(HookTarget::AddScalar, |_call: &SummaryCall| {
        Err(HookError::Failed {
            target: HookTarget::AddScalar,
            reason: "disk full".into(),
        })
    });
    let seen = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&seen);
    let mut registry = SummaryHookRegistry::new(Arc::clone(&table));
    registry.install(
        [HookTarget::AddScalar],
        Arc::new(move |_target: HookTarget, _call: &SummaryCall| {
            *counter.lock().unwrap() += 1;
        }),
    );
    let err = table.call(HookTarget::AddScalar, &scalar("loss")).unwrap_err();
    assert!(err.to_string().contains("disk full"));
    assert_eq!(*seen.lock().unwrap(), 1);
}

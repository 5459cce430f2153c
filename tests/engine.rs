use runtime_context as rc_lib;
use rc_lib::{vars, Error, RuntimeContext, Vars};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::Arc;

// Shared fixture: every test runs inside one entered scope.
fn with_rc(f: impl FnOnce(&RuntimeContext)) {
    let rc = RuntimeContext::new();
    rc.empty_context().run(|| f(&rc)).unwrap();
}

#[test]
fn fixture_has_ambient_plus_one_frame() {
    with_rc(|rc| {
        assert_eq!(rc.depth(), 2);
        assert_eq!(rc.current().unwrap(), Vars::new());
    });
}

#[test]
fn nested_overrides_resolve_innermost_first() {
    with_rc(|rc| {
        rc.scope([("a", 1)], || {
            assert_eq!(rc.require("a").unwrap(), json!(1));
            assert!(matches!(rc.require("b"), Err(Error::UnknownAttribute(_))));

            rc.scope([("b", 2)], || {
                assert_eq!((rc.get("a"), rc.get("b")), (Some(json!(1)), Some(json!(2))));

                rc.empty_context()
                    .run(|| {
                        assert_eq!((rc.get("a"), rc.get("b")), (Some(json!(1)), Some(json!(2))));

                        rc.scope([("a", 4)], || {
                            assert_eq!((rc.get("a"), rc.get("b")), (Some(json!(4)), Some(json!(2))));
                            rc.scope([("a", 5), ("b", 5)], || {
                                assert_eq!((rc.get("a"), rc.get("b")), (Some(json!(5)), Some(json!(5))));
                            })
                            .unwrap();
                            assert_eq!((rc.get("a"), rc.get("b")), (Some(json!(4)), Some(json!(2))));
                        })
                        .unwrap();
                    })
                    .unwrap();
            })
            .unwrap();

            assert_eq!(rc.get("a"), Some(json!(1)));
            assert!(!rc.has("b"));
        })
        .unwrap();
    });
}

#[test]
fn scenario_a_shadowing_and_reveal() {
    let e = RuntimeContext::new();
    {
        let _outer = e.context([("a", 1)]).enter().unwrap();
        assert_eq!(e.get("a"), Some(json!(1)));
        {
            let _inner = e.context([("a", 4)]).enter().unwrap();
            assert_eq!(e.get("a"), Some(json!(4)));
        }
        assert_eq!(e.get("a"), Some(json!(1)));
    }
    assert_eq!(e.get("a"), None);
}

#[test]
fn has_and_get_with_defaults() {
    with_rc(|rc| {
        assert!(!rc.has("xx"));
        assert_eq!(rc.get("xx"), None);
        assert_eq!(rc.get_or("xx", 5), json!(5));

        rc.scope([("xx", false)], || {
            assert!(rc.has("xx"));
            assert_eq!(rc.get_or("xx", 5), json!(false));
            rc.empty_context()
                .run(|| {
                    assert!(rc.has("xx"));
                    rc.scope([("xx", true)], || assert_eq!(rc.get_or("xx", 5), json!(true)))
                        .unwrap();
                    assert_eq!(rc.get_or("xx", 5), json!(false));
                })
                .unwrap();
        })
        .unwrap();

        assert!(!rc.has("xx"));
        assert_eq!(rc.get_or("xx", 5), json!(5));
    });
}

#[test]
fn set_is_dropped_with_its_frame() {
    with_rc(|rc| {
        rc.empty_context()
            .run(|| {
                rc.set("yy", false).unwrap();
                assert_eq!(rc.get("yy"), Some(json!(false)));
            })
            .unwrap();
        assert_eq!(rc.get("yy"), None);

        rc.empty_context()
            .run(|| {
                rc.set("yy", true).unwrap();
                rc.empty_context()
                    .run(|| {
                        rc.scope(Vars::new(), || {
                            rc.set("yy", 22).unwrap();
                            assert_eq!(rc.get("yy"), Some(json!(22)));
                        })
                        .unwrap();
                        assert_eq!(rc.get("yy"), Some(json!(true)));
                    })
                    .unwrap();
            })
            .unwrap();
        assert!(!rc.has("yy"));
    });
}

#[test]
fn scenario_d_strict_engine_needs_a_scope() {
    let e = RuntimeContext::strict();
    let err = e.set("x", 1).unwrap_err();
    assert!(matches!(err, Error::OutsideScope(ref n) if n == "x"));
    assert!(err.to_string().contains("\"x\""));
    assert_eq!(e.depth(), 0);

    let guard = e.context(Vars::new()).enter().unwrap();
    e.set("x", 1).unwrap();
    assert_eq!(e.get("x"), Some(json!(1)));
    assert_eq!(guard.exit().unwrap(), vars([("x", 1)]));
}

#[test]
fn push_and_pop_manually() {
    let e = RuntimeContext::new();
    e.push_context([("a", 1)]).unwrap();
    e.push_context(vars([("a", 2)])).unwrap();
    assert_eq!(e.get("a"), Some(json!(2)));
    assert_eq!(e.pop_context().unwrap(), vars([("a", 2)]));
    assert_eq!(e.get("a"), Some(json!(1)));
    e.pop_context().unwrap();
    // the ambient frame can be popped too, after which the engine is empty
    e.pop_context().unwrap();
    assert!(matches!(e.current(), Err(Error::NoActiveContext)));
    assert!(matches!(e.set("a", 1), Err(Error::OutsideScope(_))));
}

#[test]
#[should_panic(expected = "is current")]
fn exiting_a_buried_frame_panics() {
    let e = RuntimeContext::new();
    let outer = e.context([("a", 1)]).enter().unwrap();
    let _inner = e.context([("a", 2)]).enter().unwrap();
    let _ = outer.exit();
}

#[test]
#[should_panic(expected = "stack is empty")]
fn double_pop_panics() {
    let e = RuntimeContext::strict();
    let guard = e.context([("a", 1)]).enter().unwrap();
    e.pop_context().unwrap();
    drop(guard);
}

#[test]
fn unwinding_pops_frames_left_above_the_scope() {
    let e = RuntimeContext::strict();
    let exited = Arc::new(Mutex::new(Vec::<Value>::new()));
    let sink = exited.clone();
    e.context_exited().listener(move |p| {
        sink.lock().push(p["context_vars"].clone());
        Ok(())
    });

    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        e.scope([("a", 1)], || {
            e.push_context([("b", 2)]).unwrap();
            panic!("boom");
        })
    }));

    assert!(outcome.is_err());
    assert_eq!(e.depth(), 0);
    assert_eq!(e.get("a"), None);
    assert_eq!(*exited.lock(), vec![json!({"b": 2}), json!({"a": 1})]);
}

#[test]
fn reset_events_count_one_per_exited_variable() {
    let e = RuntimeContext::new();
    let exited = Arc::new(Mutex::new(Vec::<Value>::new()));
    let sink = exited.clone();
    e.context_exited().listener(move |p| {
        let vars = p["context_vars"].as_object().cloned().unwrap_or_default();
        sink.lock().extend(vars.keys().map(|k| json!(k)));
        Ok(())
    });

    e.scope([("v1", 1)], || {
        e.scope([("v2", 2)], || {
            e.scope([("v3", 3)], || {}).unwrap();
        })
        .unwrap();
    })
    .unwrap();

    assert_eq!(*exited.lock(), vec![json!("v3"), json!("v2"), json!("v1")]);
}

#[test]
fn reset_of_absent_name_is_silent() {
    let e = RuntimeContext::new();
    let fired = Arc::new(Mutex::new(0));
    let counter = fired.clone();
    e.context_var_reset().listener(move |_| {
        *counter.lock() += 1;
        Ok(())
    });
    e.scope([("a", 1)], || {
        e.scope(Vars::new(), || {
            assert_eq!(e.reset("a").unwrap(), false);
        })
        .unwrap();
        assert_eq!(e.reset("a").unwrap(), true);
    })
    .unwrap();
    assert_eq!(*fired.lock(), 1);
}

#[test]
fn same_value_override_still_counts_as_present() {
    let e = RuntimeContext::new();
    e.set("a", 1).unwrap();
    e.scope([("a", 1)], || {
        assert_eq!(e.reset("a").unwrap(), true);
        assert_eq!(e.get("a"), Some(json!(1)));
    })
    .unwrap();
}

#[test]
fn events_fire_in_nesting_order() {
    let e = RuntimeContext::new();
    let calls = Arc::new(Mutex::new(Vec::new()));
    let entered = calls.clone();
    e.context_entered().listener(move |p| {
        entered.lock().push(("context_entered", p["context_vars"].clone()));
        Ok(())
    });
    let exited = calls.clone();
    e.context_exited().listener(move |p| {
        exited.lock().push(("context_exited", p["context_vars"].clone()));
        Ok(())
    });

    e.scope([("x", 1)], || e.scope([("y", 2)], || {}).unwrap()).unwrap();

    assert_eq!(
        *calls.lock(),
        vec![
            ("context_entered", json!({"x": 1})),
            ("context_entered", json!({"y": 2})),
            ("context_exited", json!({"y": 2})),
            ("context_exited", json!({"x": 1})),
        ]
    );
}

#[test]
fn registry_fires_engine_events_by_name() {
    let e = RuntimeContext::new();
    let hits = Arc::new(Mutex::new(0));
    let counter = hits.clone();
    e.context_entered().listener(move |_| {
        *counter.lock() += 1;
        Ok(())
    });
    e.registry().fire("context_entered", &rc_lib::Payload::new()).unwrap();
    assert_eq!(*hits.lock(), 1);
}

#[test]
fn exit_surfaces_listener_failure_but_still_pops() {
    let e = RuntimeContext::strict();
    e.context_exited().listener(|_| Err("exit hook failed".into()));
    let guard = e.context([("a", 1)]).enter().unwrap();
    let err = guard.exit().unwrap_err();
    assert!(matches!(err, Error::Listener { .. }));
    assert_eq!(e.depth(), 0);
}

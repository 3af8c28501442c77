//! End-to-end interpreter scenarios.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use harel::builder::ChartBuilder;
use harel::core::{Behavior, BehaviorError, Constraint, NodeId, Operation, PseudostateKind};
use harel::{Chart, ExecError, Machine, SendOutcome};
use parking_lot::Mutex;

fn id(chart: &Chart, name: &str) -> NodeId {
    chart
        .find(name)
        .unwrap_or_else(|| panic!("no node named '{name}'"))
}

#[tokio::test]
async fn start_enters_the_initial_cascade_outer_to_inner() {
    let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let outer_log = Arc::clone(&log);
    let inner_log = Arc::clone(&log);

    let chart = ChartBuilder::new("m")
        .initial("outer")
        .state("outer", move |s| {
            let outer_log = Arc::clone(&outer_log);
            s.entry_fn(move |_| {
                outer_log.lock().push("outer".to_string());
                Ok(())
            });
            s.initial("inner");
            s.state("inner", |s| {
                let inner_log = Arc::clone(&inner_log);
                s.entry_fn(move |_| {
                    inner_log.lock().push("inner".to_string());
                    Ok(())
                });
            });
        })
        .build()
        .unwrap();

    let machine = Machine::new(&chart);
    machine.start().await.unwrap();

    assert!(machine.is_active(&[id(&chart, "outer"), id(&chart, "inner")]));
    assert_eq!(machine.state(), vec![id(&chart, "inner")]);
    assert_eq!(*log.lock(), vec!["outer".to_string(), "inner".to_string()]);

    machine.terminate().await.unwrap();
}

#[tokio::test]
async fn send_fires_matching_transition() {
    let chart = ChartBuilder::new("toggle")
        .event("flip")
        .initial("off")
        .state("off", |s| s.on("flip").to("on"))
        .state("on", |s| s.on("flip").to("off"))
        .build()
        .unwrap();

    let machine = Machine::new(&chart);
    machine.start().await.unwrap();
    assert_eq!(machine.state(), vec![id(&chart, "off")]);

    let outcome = machine.send(id(&chart, "flip")).await.unwrap();
    assert_eq!(outcome, SendOutcome::Consumed);
    assert_eq!(machine.state(), vec![id(&chart, "on")]);

    machine.send(id(&chart, "flip")).await.unwrap();
    assert_eq!(machine.state(), vec![id(&chart, "off")]);

    machine.terminate().await.unwrap();
}

#[tokio::test]
async fn unmatched_event_is_unconsumed() {
    let chart = ChartBuilder::new("m")
        .event("noop")
        .initial("a")
        .state("a", |_| {})
        .build()
        .unwrap();

    let machine = Machine::new(&chart);
    machine.start().await.unwrap();

    let outcome = machine.send(id(&chart, "noop")).await.unwrap();
    assert_eq!(outcome, SendOutcome::Unconsumed);
    assert_eq!(machine.state(), vec![id(&chart, "a")]);

    machine.terminate().await.unwrap();
}

#[tokio::test]
async fn orthogonal_region_is_unaffected_by_sibling_event() {
    let chart = ChartBuilder::new("m")
        .event("e1")
        .initial("p")
        .state("p", |s| {
            s.region("r1", |r| {
                r.initial("a");
                r.state("a", |s| s.on("e1").to("b"));
                r.state("b", |_| {});
            });
            s.region("r2", |r| {
                r.initial("x");
                r.state("x", |_| {});
                r.state("y", |_| {});
            });
        })
        .build()
        .unwrap();

    let machine = Machine::new(&chart);
    machine.start().await.unwrap();
    assert!(machine.is_active(&[id(&chart, "a"), id(&chart, "x")]));

    machine.send(id(&chart, "e1")).await.unwrap();
    assert_eq!(machine.state(), vec![id(&chart, "b"), id(&chart, "x")]);

    machine.terminate().await.unwrap();
}

#[tokio::test]
async fn fork_activates_all_branch_targets() {
    let chart = ChartBuilder::new("m")
        .event("go")
        .initial("idle")
        .state("idle", |s| s.on("go").to("split"))
        .pseudostate("split", PseudostateKind::Fork)
        .transition("split", |t| t.to("b"))
        .transition("split", |t| t.to("y"))
        .state("p", |s| {
            s.region("r1", |r| {
                r.state("b", |_| {});
            });
            s.region("r2", |r| {
                r.state("y", |_| {});
            });
        })
        .build()
        .unwrap();

    let machine = Machine::new(&chart);
    machine.start().await.unwrap();

    machine.send(id(&chart, "go")).await.unwrap();
    assert!(machine.is_active(&[id(&chart, "p"), id(&chart, "b"), id(&chart, "y")]));
    assert_eq!(machine.state(), vec![id(&chart, "b"), id(&chart, "y")]);

    machine.terminate().await.unwrap();
}

#[tokio::test]
async fn join_waits_for_every_branch() {
    let chart = ChartBuilder::new("m")
        .event("e1")
        .event("e2")
        .initial("p")
        .state("p", |s| {
            s.region("r1", |r| {
                r.initial("a");
                r.state("a", |s| s.on("e1").to("meet"));
            });
            s.region("r2", |r| {
                r.initial("x");
                r.state("x", |s| s.on("e2").to("meet"));
            });
        })
        .pseudostate("meet", PseudostateKind::Join)
        .transition("meet", |t| t.to("s"))
        .state("s", |_| {})
        .build()
        .unwrap();

    let machine = Machine::new(&chart);
    machine.start().await.unwrap();

    // First branch arrives: the join must not fire yet.
    machine.send(id(&chart, "e1")).await.unwrap();
    assert!(!machine.is_active(&[id(&chart, "s")]));
    assert!(machine.is_active(&[id(&chart, "p"), id(&chart, "x")]));

    // Second branch arrives: the join fires exactly once.
    machine.send(id(&chart, "e2")).await.unwrap();
    assert_eq!(machine.state(), vec![id(&chart, "s")]);

    let join_firings = machine
        .trace()
        .records()
        .iter()
        .filter(|r| r.source == Some(id(&chart, "meet")))
        .count();
    assert_eq!(join_firings, 1);

    machine.terminate().await.unwrap();
}

#[tokio::test]
async fn choice_takes_first_enabled_branch_and_falls_back_to_default() {
    let build = |first: bool, second: bool| {
        ChartBuilder::new("m")
            .event("go")
            .initial("idle")
            .state("idle", |s| s.on("go").to("pick"))
            .pseudostate("pick", PseudostateKind::Choice)
            .transition("pick", move |t| t.when_fn(move |_| first).to("t1"))
            .transition("pick", move |t| t.when_fn(move |_| second).to("t2"))
            .transition("pick", |t| t.to("t3"))
            .state("t1", |_| {})
            .state("t2", |_| {})
            .state("t3", |_| {})
            .build()
            .unwrap()
    };

    let chart = build(false, false);
    let machine = Machine::new(&chart);
    machine.start().await.unwrap();
    machine.send(id(&chart, "go")).await.unwrap();
    assert_eq!(machine.state(), vec![id(&chart, "t3")]);
    machine.terminate().await.unwrap();

    let chart = build(true, false);
    let machine = Machine::new(&chart);
    machine.start().await.unwrap();
    machine.send(id(&chart, "go")).await.unwrap();
    assert_eq!(machine.state(), vec![id(&chart, "t1")]);
    machine.terminate().await.unwrap();
}

#[tokio::test]
async fn junction_without_enabled_branch_is_an_error() {
    let chart = ChartBuilder::new("m")
        .event("go")
        .initial("idle")
        .state("idle", |s| s.on("go").to("relay"))
        .pseudostate("relay", PseudostateKind::Junction)
        .transition("relay", |t| t.when_fn(|_| false).to("t1"))
        .state("t1", |_| {})
        .build()
        .unwrap();

    let machine = Machine::new(&chart);
    machine.start().await.unwrap();

    let error = machine.send(id(&chart, "go")).await.unwrap_err();
    assert!(matches!(error, ExecError::NoEnabledBranch { .. }));

    machine.terminate().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn time_event_returns_to_origin() {
    let chart = ChartBuilder::new("m")
        .event("e1")
        .initial("s0")
        .state("s0", |s| s.on("e1").to("s1"))
        .state("s1", |s| s.after(Duration::from_secs(1)).to("s0"))
        .build()
        .unwrap();

    let machine = Machine::new(&chart);
    machine.start().await.unwrap();

    machine.send(id(&chart, "e1")).await.unwrap();
    assert_eq!(machine.state(), vec![id(&chart, "s1")]);

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(machine.state(), vec![id(&chart, "s0")]);

    machine.terminate().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn timer_is_cancelled_when_its_state_exits() {
    let chart = ChartBuilder::new("m")
        .event("leave")
        .initial("s1")
        .state("s1", |s| {
            s.after(Duration::from_secs(1)).to("timed_out");
            s.on("leave").to("safe");
        })
        .state("timed_out", |_| {})
        .state("safe", |_| {})
        .build()
        .unwrap();

    let machine = Machine::new(&chart);
    machine.start().await.unwrap();

    machine.send(id(&chart, "leave")).await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(machine.state(), vec![id(&chart, "safe")]);

    machine.terminate().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn completion_fires_only_after_the_activity_resolves() {
    let chart = ChartBuilder::new("m")
        .initial("s1")
        .state("s1", |s| {
            s.activity(Behavior::new(|_| async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(())
            }));
            s.on_completion().to("s2");
        })
        .state("s2", |_| {})
        .build()
        .unwrap();

    let machine = Machine::new(&chart);
    machine.start().await.unwrap();
    assert_eq!(machine.state(), vec![id(&chart, "s1")]);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(machine.state(), vec![id(&chart, "s2")]);

    machine.terminate().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn change_event_fires_once_predicate_holds() {
    let flag = Arc::new(AtomicBool::new(false));
    let probe = Arc::clone(&flag);

    let chart = ChartBuilder::new("m")
        .change_event(
            "ready",
            Constraint::from_fn(move |_| probe.load(Ordering::SeqCst)),
        )
        .initial("a")
        .state("a", |s| s.on("ready").to("b"))
        .state("b", |_| {})
        .build()
        .unwrap();

    let machine = Machine::new(&chart);
    machine.start().await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(machine.state(), vec![id(&chart, "a")]);

    flag.store(true, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(machine.state(), vec![id(&chart, "b")]);

    machine.terminate().await.unwrap();
}

#[tokio::test]
async fn internal_transition_runs_effect_without_exiting() {
    let count = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&count);
    let exits = Arc::new(AtomicUsize::new(0));
    let exit_probe = Arc::clone(&exits);

    let chart = ChartBuilder::new("m")
        .event("tick")
        .initial("a")
        .state("a", move |s| {
            let counter = Arc::clone(&counter);
            let exit_probe = Arc::clone(&exit_probe);
            s.exit_fn(move |_| {
                exit_probe.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            s.on("tick")
                .effect_fn(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .internal();
        })
        .build()
        .unwrap();

    let machine = Machine::new(&chart);
    machine.start().await.unwrap();

    machine.send(id(&chart, "tick")).await.unwrap();
    machine.send(id(&chart, "tick")).await.unwrap();

    assert_eq!(count.load(Ordering::SeqCst), 2);
    assert_eq!(exits.load(Ordering::SeqCst), 0);
    assert_eq!(machine.state(), vec![id(&chart, "a")]);

    machine.terminate().await.unwrap();
}

#[tokio::test]
async fn deferred_event_is_retried_after_the_next_transition() {
    let chart = ChartBuilder::new("m")
        .event("e1")
        .event("e2")
        .initial("a")
        .state("a", |s| {
            s.defer("e2");
            s.on("e1").to("b");
        })
        .state("b", |s| s.on("e2").to("c"))
        .state("c", |_| {})
        .build()
        .unwrap();

    let machine = Machine::new(&chart);
    machine.start().await.unwrap();

    let outcome = machine.send(id(&chart, "e2")).await.unwrap();
    assert_eq!(outcome, SendOutcome::Deferred);
    assert_eq!(machine.state(), vec![id(&chart, "a")]);

    // e2 is still deferred while a is being left; it carries over to the
    // next step's candidate set.
    machine.send(id(&chart, "e1")).await.unwrap();
    assert_eq!(machine.state(), vec![id(&chart, "b")]);

    // The next step picks the deferred e2 up before its own event.
    let outcome = machine.send(id(&chart, "e1")).await.unwrap();
    assert_eq!(outcome, SendOutcome::Unconsumed);
    assert_eq!(machine.state(), vec![id(&chart, "c")]);

    machine.terminate().await.unwrap();
}

#[tokio::test]
async fn final_state_terminates_the_machine() {
    let chart = ChartBuilder::new("m")
        .event("quit")
        .initial("a")
        .state("a", |s| s.on("quit").to("done"))
        .final_state("done")
        .build()
        .unwrap();

    let machine = Machine::new(&chart);
    machine.start().await.unwrap();

    machine.send(id(&chart, "quit")).await.unwrap();
    assert!(machine.state().is_empty());
    assert!(matches!(
        machine.send(id(&chart, "quit")).await,
        Err(ExecError::NotRunning)
    ));
}

#[tokio::test]
async fn terminate_pseudostate_stops_without_exit_behaviors() {
    let exits = Arc::new(AtomicUsize::new(0));
    let probe = Arc::clone(&exits);

    let chart = ChartBuilder::new("m")
        .event("kill")
        .initial("a")
        .state("a", move |s| {
            let probe = Arc::clone(&probe);
            s.exit_fn(move |_| {
                probe.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            s.on("kill").to("stop");
        })
        .pseudostate("stop", PseudostateKind::Terminate)
        .build()
        .unwrap();

    let machine = Machine::new(&chart);
    machine.start().await.unwrap();

    machine.send(id(&chart, "kill")).await.unwrap();
    assert!(machine.state().is_empty());
    // The source state was exited by the transition itself; the terminate
    // teardown ran no further exit behaviors.
    assert_eq!(exits.load(Ordering::SeqCst), 1);
    assert!(matches!(
        machine.send(id(&chart, "kill")).await,
        Err(ExecError::NotRunning)
    ));
}

#[tokio::test]
async fn shallow_history_restores_the_last_substate() {
    let chart = ChartBuilder::new("m")
        .event("e1")
        .event("off")
        .event("on")
        .initial("q")
        .state("q", |s| s.on("on").to("h"))
        .state("p", |s| {
            s.initial("a");
            s.pseudostate("h", PseudostateKind::ShallowHistory);
            s.state("a", |s| s.on("e1").to("b"));
            s.state("b", |_| {});
            s.on("off").to("q");
        })
        .transition("h", |t| t.to("a"))
        .build()
        .unwrap();

    let machine = Machine::new(&chart);
    machine.start().await.unwrap();
    assert_eq!(machine.state(), vec![id(&chart, "q")]);

    // No history yet: the history vertex takes its default transition.
    machine.send(id(&chart, "on")).await.unwrap();
    assert_eq!(machine.state(), vec![id(&chart, "a")]);

    machine.send(id(&chart, "e1")).await.unwrap();
    assert_eq!(machine.state(), vec![id(&chart, "b")]);

    machine.send(id(&chart, "off")).await.unwrap();
    assert_eq!(machine.state(), vec![id(&chart, "q")]);

    // Re-entering through history restores b, not the initial a.
    machine.send(id(&chart, "on")).await.unwrap();
    assert_eq!(machine.state(), vec![id(&chart, "b")]);

    machine.terminate().await.unwrap();
}

#[tokio::test]
async fn submachine_completion_completes_the_hosting_state() {
    let chart = ChartBuilder::new("m")
        .event("e")
        .initial("host")
        .state("host", |s| {
            s.submachine("sub", |r| {
                r.initial("w");
                r.state("w", |st| st.on("e").to("sub_done"));
                r.final_state("sub_done");
            });
            s.on_completion().to("after");
        })
        .state("after", |_| {})
        .build()
        .unwrap();

    let machine = Machine::new(&chart);
    machine.start().await.unwrap();
    assert!(machine.is_active(&[id(&chart, "host"), id(&chart, "w")]));

    machine.send(id(&chart, "e")).await.unwrap();
    assert_eq!(machine.state(), vec![id(&chart, "after")]);

    machine.terminate().await.unwrap();
}

#[tokio::test]
async fn guard_error_surfaces_to_the_sender() {
    let chart = ChartBuilder::new("m")
        .event("go")
        .initial("a")
        .state("a", |s| {
            s.on("go")
                .when(Constraint::new(|_| async {
                    Err(BehaviorError::new("guard blew up"))
                }))
                .to("b");
        })
        .state("b", |_| {})
        .build()
        .unwrap();

    let machine = Machine::new(&chart);
    machine.start().await.unwrap();

    let error = machine.send(id(&chart, "go")).await.unwrap_err();
    assert!(matches!(error, ExecError::Behavior(_)));
    // The machine is still consistent and can be terminated.
    assert_eq!(machine.state(), vec![id(&chart, "a")]);
    machine.terminate().await.unwrap();
}

#[tokio::test]
async fn any_event_matches_every_instance() {
    let chart = ChartBuilder::new("m")
        .event("specific")
        .any_event("anything")
        .initial("a")
        .state("a", |s| s.on("anything").to("b"))
        .state("b", |_| {})
        .build()
        .unwrap();

    let machine = Machine::new(&chart);
    machine.start().await.unwrap();

    machine.send(id(&chart, "specific")).await.unwrap();
    assert_eq!(machine.state(), vec![id(&chart, "b")]);

    machine.terminate().await.unwrap();
}

#[tokio::test]
async fn invoke_runs_the_operation_and_dispatches() {
    let chart = ChartBuilder::new("m")
        .operation(
            "fetch",
            Operation::new(|_| async { Ok(serde_json::json!("payload")) }),
        )
        .initial("a")
        .state("a", |s| s.on("fetch").to("b"))
        .state("b", |_| {})
        .build()
        .unwrap();

    let machine = Machine::new(&chart);
    machine.start().await.unwrap();

    let (value, outcome) = machine.invoke(id(&chart, "fetch")).await.unwrap();
    assert_eq!(value, serde_json::json!("payload"));
    assert_eq!(outcome, SendOutcome::Consumed);
    assert_eq!(machine.state(), vec![id(&chart, "b")]);

    machine.terminate().await.unwrap();
}

#[tokio::test]
async fn exit_runs_innermost_first_and_terminate_is_idempotent() {
    let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let outer_log = Arc::clone(&log);
    let inner_log = Arc::clone(&log);

    let chart = ChartBuilder::new("m")
        .initial("outer")
        .state("outer", move |s| {
            let outer_log = Arc::clone(&outer_log);
            s.exit_fn(move |_| {
                outer_log.lock().push("outer");
                Ok(())
            });
            s.initial("inner");
            s.state("inner", |s| {
                let inner_log = Arc::clone(&inner_log);
                s.exit_fn(move |_| {
                    inner_log.lock().push("inner");
                    Ok(())
                });
            });
        })
        .build()
        .unwrap();

    let machine = Machine::new(&chart);
    machine.start().await.unwrap();
    machine.terminate().await.unwrap();

    assert_eq!(*log.lock(), vec!["inner", "outer"]);
    assert!(machine.state().is_empty());

    machine.terminate().await.unwrap();
}

#[tokio::test]
async fn send_before_start_is_rejected() {
    let chart = ChartBuilder::new("m")
        .event("e")
        .initial("a")
        .state("a", |_| {})
        .build()
        .unwrap();

    let machine = Machine::new(&chart);
    assert!(matches!(
        machine.send(id(&chart, "e")).await,
        Err(ExecError::NotRunning)
    ));

    machine.start().await.unwrap();
    assert!(matches!(
        machine.start().await,
        Err(ExecError::AlreadyStarted)
    ));
    machine.terminate().await.unwrap();
}

#[tokio::test]
async fn trace_records_the_transition_path() {
    let chart = ChartBuilder::new("m")
        .event("e1")
        .initial("a")
        .state("a", |s| s.on("e1").to("b"))
        .state("b", |_| {})
        .build()
        .unwrap();

    let machine = Machine::new(&chart);
    machine.start().await.unwrap();
    machine.send(id(&chart, "e1")).await.unwrap();

    let trace = machine.trace();
    let path = trace.path();
    // Initial pseudostate -> a, then a -> b.
    assert_eq!(path.len(), 2);
    assert_eq!(path[1], (id(&chart, "a"), id(&chart, "b")));
    assert_eq!(trace.last().unwrap().event, Some(id(&chart, "e1")));

    machine.terminate().await.unwrap();
}

mod control {
    use sable_runtime::prelude::*;
    use std::cell::RefCell;

    fn sym(name: &str) -> Value {
        Value::symbol(name)
    }

    mod frames {
        use super::*;

        #[test]
        fn push_pop_round_trip_restores_every_snapshot_field() {
            let mut ctx = Context::new();
            let before = ctx.snapshot();

            let a = ctx.push_frame(FrameKind::Block);
            let b = ctx.push_frame(FrameKind::Catch);
            let c = ctx.push_frame(FrameKind::UnwindProtect);
            let d = ctx.push_frame(FrameKind::Tagbody);

            ctx.pop_frame(d);
            ctx.pop_frame(c);
            ctx.pop_frame(b);
            ctx.pop_frame(a);

            assert_eq!(ctx.snapshot(), before);
        }

        #[test]
        fn pushing_an_unwind_protect_frame_sets_the_protect_head() {
            let mut ctx = Context::new();
            let block = ctx.push_frame(FrameKind::Block);
            assert_eq!(ctx.protect_head(), None);

            let protect = ctx.push_frame(FrameKind::UnwindProtect);
            assert_eq!(ctx.protect_head(), Some(protect));

            ctx.pop_frame(protect);
            assert_eq!(ctx.protect_head(), None);
            ctx.pop_frame(block);
        }

        #[test]
        fn frames_released_by_a_jump_are_no_longer_live() {
            let mut ctx = Context::new();
            let mut inner_id = None;
            let result = ctx.block(sym("exit"), |ctx| {
                inner_id = ctx.chain_head();
                ctx.return_from(&sym("exit"), Value::Int(1))
            });
            assert_eq!(result.unwrap(), Value::Int(1));
            assert!(!ctx.frame_is_live(inner_id.unwrap()));
        }

        #[test]
        #[should_panic(expected = "chain corrupted")]
        fn popping_a_frame_that_is_not_the_head_is_fatal() {
            let mut ctx = Context::new();
            let a = ctx.push_frame(FrameKind::Block);
            let _b = ctx.push_frame(FrameKind::Block);
            ctx.pop_frame(a);
        }
    }

    mod blocks {
        use super::*;

        #[test]
        fn return_from_yields_the_block_result() {
            let mut ctx = Context::new();
            let result = ctx.block(sym("b"), |ctx| {
                ctx.return_from::<Value>(&sym("b"), Value::Int(42))
            });
            assert_eq!(result.unwrap(), Value::Int(42));
        }

        #[test]
        fn return_from_crosses_intervening_blocks() {
            let mut ctx = Context::new();
            let result = ctx.block(sym("outer"), |ctx| {
                ctx.block(sym("inner"), |ctx| {
                    ctx.return_from(&sym("outer"), Value::Int(7))
                })?;
                Ok(Value::Nil)
            });
            assert_eq!(result.unwrap(), Value::Int(7));
            assert_eq!(ctx.chain_head(), None);
        }

        #[test]
        fn return_from_matches_the_innermost_block_with_the_name() {
            let mut ctx = Context::new();
            let result = ctx.block(sym("b"), |ctx| {
                let inner = ctx.block(sym("b"), |ctx| {
                    ctx.return_from(&sym("b"), Value::Int(1))
                })?;
                assert_eq!(inner, Value::Int(1));
                Ok(Value::Int(2))
            });
            assert_eq!(result.unwrap(), Value::Int(2));
        }

        #[test]
        fn unmatched_return_from_is_a_control_error() {
            let mut ctx = Context::new();
            let result = ctx.block(sym("b"), |ctx| {
                ctx.return_from::<Value>(&sym("nope"), Value::Nil)
            });
            match result {
                Err(Unwind::Error(error)) => {
                    assert_eq!(error.kind(), &ErrorKind::UnmatchedReturn(sym("nope")));
                }
                other => panic!("expected a control error, got {other:?}"),
            }
            // The block's frame was still unwound
            assert_eq!(ctx.chain_head(), None);
        }

        #[test]
        fn abrupt_exit_restores_the_stack_mark() {
            let mut ctx = Context::new();
            let result = ctx.block(sym("b"), |ctx| {
                ctx.push_value(Value::Int(1));
                ctx.push_value(Value::Int(2));
                ctx.return_from(&sym("b"), Value::Nil)
            });
            assert!(result.is_ok());
            assert_eq!(ctx.stack_len(), 0);
        }
    }

    mod catch_throw {
        use super::*;

        #[test]
        fn catch_throw_yields_the_thrown_value_and_leaves_the_chain_unchanged() {
            let mut ctx = Context::new();
            let head_before = ctx.chain_head();
            let result = ctx.catch_value(sym("k"), |ctx| {
                ctx.throw_value(&sym("k"), Value::Int(42))
            });
            assert_eq!(result.unwrap(), Value::Int(42));
            assert_eq!(ctx.chain_head(), head_before);
        }

        #[test]
        fn tags_match_by_value_equality_not_identity() {
            let mut ctx = Context::new();
            // A fresh, structurally equal tag value matches
            let result = ctx.catch_value(Value::list([sym("a"), Value::Int(1)]), |ctx| {
                ctx.throw_value(&Value::list([sym("a"), Value::Int(1)]), Value::Int(5))
            });
            assert_eq!(result.unwrap(), Value::Int(5));
        }

        #[test]
        fn throw_matches_the_innermost_catch_with_an_equal_tag() {
            let mut ctx = Context::new();
            let result = ctx.catch_value(sym("k"), |ctx| {
                let inner =
                    ctx.catch_value(sym("k"), |ctx| ctx.throw_value(&sym("k"), Value::Int(1)))?;
                assert_eq!(inner, Value::Int(1));
                Ok(Value::Int(2))
            });
            assert_eq!(result.unwrap(), Value::Int(2));
        }

        #[test]
        fn throw_crosses_catches_with_different_tags() {
            let mut ctx = Context::new();
            let result = ctx.catch_value(sym("outer"), |ctx| {
                ctx.catch_value(sym("inner"), |ctx| {
                    ctx.throw_value(&sym("outer"), Value::Int(9))
                })?;
                Ok(Value::Nil)
            });
            assert_eq!(result.unwrap(), Value::Int(9));
        }

        #[test]
        fn unmatched_throw_is_a_control_error() {
            let mut ctx = Context::new();
            let result = ctx.catch_value(sym("k"), |ctx| {
                ctx.throw_value(&sym("other"), Value::Nil)
            });
            match result {
                Err(Unwind::Error(error)) => {
                    assert_eq!(error.kind(), &ErrorKind::UnmatchedThrow(sym("other")));
                }
                other => panic!("expected a control error, got {other:?}"),
            }
        }
    }

    mod unwind_protect {
        use super::*;

        #[test]
        fn cleanup_runs_on_normal_exit() {
            let mut ctx = Context::new();
            let ran = RefCell::new(0);
            let result = ctx.unwind_protect(
                |_| Ok(Value::Int(1)),
                |_| {
                    *ran.borrow_mut() += 1;
                    Ok(())
                },
            );
            assert_eq!(result.unwrap(), Value::Int(1));
            assert_eq!(*ran.borrow(), 1);
        }

        #[test]
        fn cleanups_run_innermost_first_on_return_from() {
            let mut ctx = Context::new();
            let log = RefCell::new(Vec::new());
            let result = ctx.block(sym("exit"), |ctx| {
                ctx.unwind_protect(
                    |ctx| {
                        ctx.unwind_protect(
                            |ctx| ctx.return_from(&sym("exit"), Value::Int(7)),
                            |_| {
                                log.borrow_mut().push("inner");
                                Ok(())
                            },
                        )
                    },
                    |_| {
                        log.borrow_mut().push("outer");
                        Ok(())
                    },
                )
            });
            assert_eq!(result.unwrap(), Value::Int(7));
            assert_eq!(*log.borrow(), vec!["inner", "outer"]);
        }

        #[test]
        fn cleanups_run_exactly_once_on_throw() {
            let mut ctx = Context::new();
            let ran = RefCell::new(0);
            let result = ctx.catch_value(sym("k"), |ctx| {
                ctx.unwind_protect(
                    |ctx| ctx.throw_value(&sym("k"), Value::Int(3)),
                    |_| {
                        *ran.borrow_mut() += 1;
                        Ok(())
                    },
                )
            });
            assert_eq!(result.unwrap(), Value::Int(3));
            assert_eq!(*ran.borrow(), 1);
        }

        #[test]
        fn cleanups_run_while_a_control_error_unwinds() {
            let mut ctx = Context::new();
            let ran = RefCell::new(0);
            let result = ctx.unwind_protect(
                |ctx| ctx.throw_value::<Value>(&sym("nobody-catches-this"), Value::Nil),
                |_| {
                    *ran.borrow_mut() += 1;
                    Ok(())
                },
            );
            assert!(matches!(result, Err(Unwind::Error(_))));
            assert_eq!(*ran.borrow(), 1);
        }

        #[test]
        fn an_exit_from_the_cleanup_supersedes_the_one_in_flight() {
            let mut ctx = Context::new();
            let result = ctx.block(sym("cleanup-exit"), |ctx| {
                let inner = ctx.block(sym("body-exit"), |ctx| {
                    ctx.unwind_protect(
                        |ctx| ctx.return_from(&sym("body-exit"), Value::Int(1)),
                        |ctx| {
                            ctx.return_from(&sym("cleanup-exit"), Value::Int(2))
                        },
                    )
                });
                // The body's exit never completes
                assert!(inner.is_err());
                inner
            });
            assert_eq!(result.unwrap(), Value::Int(2));
        }
    }

    mod tagbody_go {
        use super::*;

        #[test]
        fn go_resumes_the_body_at_the_labeled_statement() {
            let mut ctx = Context::new();
            let visits = RefCell::new(Vec::new());
            let jumped = RefCell::new(false);
            let result = ctx.tagbody(&[(sym("again"), 1)], 3, |ctx, pc| {
                visits.borrow_mut().push(pc);
                if pc == 2 && !*jumped.borrow() {
                    *jumped.borrow_mut() = true;
                    return ctx.go(&sym("again"));
                }
                Ok(())
            });
            assert!(result.is_ok());
            assert_eq!(*visits.borrow(), vec![0, 1, 2, 1, 2]);
        }

        #[test]
        fn go_reaches_labels_in_enclosing_tagbodies() {
            let mut ctx = Context::new();
            let cleanups = RefCell::new(0);
            let visits = RefCell::new(Vec::new());
            let result = ctx.tagbody(&[(sym("l1"), 1)], 2, |ctx, pc| {
                visits.borrow_mut().push(pc);
                match pc {
                    0 => {
                        // A nested activation jumps out through an
                        // unwind-protect to the enclosing body's label
                        ctx.call(|ctx| {
                            ctx.tagbody(&[], 1, |ctx, _| {
                                ctx.unwind_protect(
                                    |ctx| ctx.go(&sym("l1")),
                                    |_| {
                                        *cleanups.borrow_mut() += 1;
                                        Ok(())
                                    },
                                )
                            })
                        })
                    }
                    _ => {
                        // Depth was restored to the enclosing body's
                        // push-time value
                        assert_eq!(ctx.call_depth(), 0);
                        Ok(())
                    }
                }
            });
            assert!(result.is_ok());
            assert_eq!(*cleanups.borrow(), 1);
            assert_eq!(*visits.borrow(), vec![0, 1]);
        }

        #[test]
        fn unmatched_go_is_a_control_error() {
            let mut ctx = Context::new();
            let result = ctx.tagbody(&[(sym("here"), 0)], 1, |ctx, _| {
                ctx.go(&sym("nowhere"))
            });
            match result {
                Err(Unwind::Error(error)) => {
                    assert_eq!(error.kind(), &ErrorKind::UnmatchedGo(sym("nowhere")));
                }
                other => panic!("expected a control error, got {other:?}"),
            }
        }

        #[test]
        fn labels_die_with_their_tagbody() {
            let mut ctx = Context::new();
            let result = ctx.tagbody(&[(sym("l"), 0)], 1, |_, _| Ok(()));
            assert!(result.is_ok());
            assert_eq!(ctx.tag_head(), None);

            // Jumping after the body has exited finds nothing
            let result: Flow<Value> = ctx.go(&sym("l"));
            assert!(matches!(result, Err(Unwind::Error(_))));
        }
    }

    mod activations {
        use super::*;
        use test_case::test_case;

        fn recurse(ctx: &mut Context) -> Flow<Value> {
            ctx.call(recurse)
        }

        #[test_case(8)]
        #[test_case(64)]
        fn call_depth_limit_is_enforced(limit: usize) {
            let mut ctx = Context::with_settings(ContextSettings {
                call_depth_limit: limit,
            });
            match recurse(&mut ctx) {
                Err(Unwind::Error(error)) => {
                    assert_eq!(error.kind(), &ErrorKind::CallDepthExceeded { limit });
                }
                other => panic!("expected a control error, got {other:?}"),
            }
            // Every activation restored the depth on the way out
            assert_eq!(ctx.call_depth(), 0);
        }

        #[test]
        fn a_signal_reaching_the_top_level_becomes_a_control_error() {
            let mut ctx = Context::new();
            let id = ctx.push_frame(FrameKind::Block);
            ctx.pop_frame(id);
            let unwind = Unwind::Return {
                target: id,
                value: Value::Nil,
            };
            assert_eq!(unwind.into_error().kind(), &ErrorKind::ExpiredTarget);
        }
    }

    mod bindings {
        use super::*;

        #[test]
        fn with_binding_restores_the_shadowed_value_on_normal_exit() {
            let mut ctx = Context::new();
            ctx.set_global("x".into(), Value::Int(1));
            let result = ctx.with_binding("x".into(), Value::Int(2), |ctx| {
                assert_eq!(ctx.global("x"), Some(&Value::Int(2)));
                Ok(Value::Nil)
            });
            assert!(result.is_ok());
            assert_eq!(ctx.global("x"), Some(&Value::Int(1)));
        }

        #[test]
        fn with_binding_restores_the_shadowed_value_on_abrupt_exit() {
            let mut ctx = Context::new();
            ctx.set_global("x".into(), Value::Int(1));
            let result = ctx.block(sym("b"), |ctx| {
                ctx.with_binding("x".into(), Value::Int(2), |ctx| {
                    ctx.return_from(&sym("b"), Value::Nil)
                })
            });
            assert!(result.is_ok());
            assert_eq!(ctx.global("x"), Some(&Value::Int(1)));
        }

        #[test]
        fn an_unbound_binding_is_removed_on_unwind() {
            let mut ctx = Context::new();
            let result = ctx.with_binding("fresh".into(), Value::Int(3), |ctx| {
                assert_eq!(ctx.global("fresh"), Some(&Value::Int(3)));
                Ok(Value::Nil)
            });
            assert!(result.is_ok());
            assert_eq!(ctx.global("fresh"), None);
        }
    }

    mod recovery {
        use super::*;

        #[test]
        fn reset_leaves_the_primordial_frame_as_the_sole_root() {
            let mut ctx = Context::new();
            let primordial = ctx.install_primordial();

            // Simulate state stranded by a fault that bypassed the wrappers
            ctx.push_frame(FrameKind::Block);
            ctx.push_frame(FrameKind::UnwindProtect);
            ctx.push_value(Value::Int(1));
            ctx.set_values([Value::Int(1), Value::Int(2)]);

            ctx.reset_to_primordial();
            assert_eq!(ctx.chain_head(), Some(primordial));
            assert_eq!(ctx.protect_head(), None);
            assert_eq!(ctx.tag_head(), None);
            assert_eq!(ctx.stack_len(), 0);
            assert_eq!(ctx.call_depth(), 0);
            assert!(ctx.take_values().is_none());
        }

        #[test]
        fn the_backtrace_is_bounded_and_newest_first() {
            let mut ctx = Context::new();
            ctx.install_primordial();
            for _ in 0..10 {
                ctx.push_frame(FrameKind::Block);
            }
            let trace = ctx.backtrace(4);
            assert_eq!(trace.len(), 4);
            assert_eq!(trace[0].kind, FrameKind::Block);

            let full = ctx.backtrace(64);
            assert_eq!(full.len(), 11);
            assert_eq!(full.last().unwrap().kind, FrameKind::Primordial);
        }

        #[test]
        fn multiple_values_round_trip() {
            let mut ctx = Context::new();
            assert!(ctx.take_values().is_none());
            ctx.set_values([Value::Int(1), Value::Int(2), Value::Int(3)]);
            let values = ctx.take_values().unwrap();
            assert_eq!(values.as_slice(), &[Value::Int(1), Value::Int(2), Value::Int(3)]);
            assert!(ctx.take_values().is_none());
        }
    }
}

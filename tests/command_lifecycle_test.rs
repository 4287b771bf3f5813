//! 指令生命周期集成测试

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use hive::agent::{Agent, AgentStatus, AgentStatusUpdate, Platform};
    use hive::command::{
        CommandEngine, CommandStatus, CommandType, CorrelationId, HistoryEvent, OperatorInput,
        Outcome, Reconciliation,
    };
    use hive::config::AppConfig;
    use hive::core::{CommandError, DispatchError, EngineBuilder, FailureKind, TranslationError};
    use hive::llm::{LlmClient, Message, MockLlmClient};
    use hive::relay::{RelayError, RelayMessage, RelaySink};
    use hive::transport::{
        Acknowledgement, ChannelTransport, CompletionEvent, DispatchMessage, InboundEvent, Transport,
        TransportError,
    };
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    struct FixedReply(&'static str);

    #[async_trait]
    impl LlmClient for FixedReply {
        async fn complete(&self, _messages: &[Message]) -> Result<String, String> {
            Ok(self.0.to_string())
        }
    }

    struct RejectingTransport;

    #[async_trait]
    impl Transport for RejectingTransport {
        async fn send(&self, _message: DispatchMessage) -> Result<(), TransportError> {
            Err(TransportError::SendFailed("socket closed".to_string()))
        }
    }

    /// send 长时间挂起的传输层
    struct StallingTransport;

    #[async_trait]
    impl Transport for StallingTransport {
        async fn send(&self, _message: DispatchMessage) -> Result<(), TransportError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    #[derive(Default)]
    struct CapturingSink {
        delivered: Mutex<Vec<RelayMessage>>,
    }

    #[async_trait]
    impl RelaySink for CapturingSink {
        async fn deliver(&self, message: &RelayMessage) -> Result<(), RelayError> {
            self.delivered.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    struct DownSink;

    #[async_trait]
    impl RelaySink for DownSink {
        async fn deliver(&self, _message: &RelayMessage) -> Result<(), RelayError> {
            Err(RelayError::Rejected {
                status: 503,
                body: "unavailable".to_string(),
            })
        }
    }

    fn builder(transport: Arc<dyn Transport>) -> EngineBuilder {
        EngineBuilder::new(AppConfig::default(), transport)
            .with_llm(Arc::new(MockLlmClient))
            .with_agent(Agent::new("a1", "web-01", Platform::Linux))
            .with_agent(Agent::new("a2", "db-01", Platform::Linux))
    }

    async fn engine() -> (CommandEngine, mpsc::UnboundedReceiver<DispatchMessage>) {
        let (transport, outbound) = ChannelTransport::new();
        (builder(Arc::new(transport)).build().await, outbound)
    }

    async fn wait_for_status(
        events: &mut tokio::sync::broadcast::Receiver<HistoryEvent>,
        id: &CorrelationId,
        status: CommandStatus,
    ) {
        loop {
            if let HistoryEvent::Updated(entry) = events.recv().await.unwrap() {
                if &entry.id == id && entry.status == status {
                    return;
                }
            }
        }
    }

    #[tokio::test]
    async fn test_whoami_round_trip() {
        let (engine, mut outbound) = engine().await;

        let id = engine
            .submit("a1", OperatorInput::natural("who am i"))
            .await
            .unwrap();

        let sent = outbound.recv().await.unwrap();
        assert_eq!(sent.correlation_id, id);
        assert_eq!(sent.agent_id, "a1");
        assert_eq!(sent.command, "whoami");
        assert_eq!(sent.command_type, CommandType::Bash);
        assert!(engine.is_pending(&id).await);
        assert!(engine.timer_armed(&id));

        engine
            .handle_event(InboundEvent::Completion(CompletionEvent::completed(id.clone(), "root")))
            .await;

        let entry = engine.entry(&id).await.unwrap();
        assert_eq!(entry.status, CommandStatus::Completed);
        assert_eq!(entry.output.as_deref(), Some("root"));
        assert_eq!(entry.raw_input, "who am i");
        assert_eq!(engine.pending_count().await, 0);
        assert!(!engine.timer_armed(&id));
    }

    #[tokio::test]
    async fn test_empty_translation_never_dispatches() {
        let (transport, mut outbound) = ChannelTransport::new();
        let engine = builder(Arc::new(transport))
            .with_llm(Arc::new(FixedReply(r#"{"resolvedCommand": ""}"#)))
            .build()
            .await;

        let err = engine
            .submit("a1", OperatorInput::natural("do the thing"))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Translation(TranslationError::Malformed(_))));

        assert!(outbound.try_recv().is_err());
        assert_eq!(engine.pending_count().await, 0);
        let history = engine.history().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, CommandStatus::Failed);
        assert_eq!(history[0].failure, Some(FailureKind::Translation));
        assert_eq!(history[0].command, None);
    }

    #[tokio::test]
    async fn test_empty_shell_input_is_translation_failure() {
        let (engine, mut outbound) = engine().await;
        let err = engine.submit("a1", OperatorInput::shell("   ")).await.unwrap_err();
        assert_eq!(err, CommandError::Translation(TranslationError::EmptyInput));
        assert!(outbound.try_recv().is_err());
        assert_eq!(engine.history().await.len(), 1);
    }

    #[tokio::test]
    async fn test_agent_offline_cancels_in_flight() {
        let (engine, _outbound) = engine().await;
        let first = engine.dispatch("a1", "sleep 30", CommandType::Bash, 60_000).await.unwrap();
        let second = engine.dispatch("a1", "uptime", CommandType::Bash, 60_000).await.unwrap();
        let other = engine.dispatch("a2", "uptime", CommandType::Bash, 60_000).await.unwrap();

        engine
            .handle_event(InboundEvent::AgentStatus(AgentStatusUpdate {
                agent_id: "a1".to_string(),
                status: AgentStatus::Offline,
            }))
            .await;

        for id in [&first, &second] {
            let entry = engine.entry(id).await.unwrap();
            assert_eq!(entry.status, CommandStatus::Failed);
            assert_eq!(entry.failure, Some(FailureKind::AgentDisconnected));
            assert!(!engine.is_pending(id).await);
            assert!(!engine.timer_armed(id));
        }
        assert!(engine.is_pending(&other).await);
        assert_eq!(engine.pending_count().await, 1);

        let err = engine.dispatch("a1", "ls", CommandType::Bash, 1000).await.unwrap_err();
        assert_eq!(err, DispatchError::AgentOffline("a1".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fires_after_deadline() {
        let (engine, _outbound) = engine().await;
        let mut events = engine.subscribe();
        let start = tokio::time::Instant::now();

        let id = engine.dispatch("a1", "sleep 5", CommandType::Bash, 100).await.unwrap();
        wait_for_status(&mut events, &id, CommandStatus::TimedOut).await;

        assert!(start.elapsed() >= Duration::from_millis(100));
        let entry = engine.entry(&id).await.unwrap();
        assert_eq!(entry.failure, Some(FailureKind::TimedOut));
        assert_eq!(entry.error.as_deref(), Some("command timed out after 100 ms"));
        assert!(!engine.is_pending(&id).await);
        assert!(!engine.timer_armed(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_not_fired_early() {
        let (engine, _outbound) = engine().await;
        let id = engine.dispatch("a1", "sleep 5", CommandType::Bash, 100).await.unwrap();

        tokio::time::sleep(Duration::from_millis(99)).await;
        assert!(engine.is_pending(&id).await);

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(engine.entry(&id).await.unwrap().status, CommandStatus::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_covers_stalled_send() {
        let engine = builder(Arc::new(StallingTransport)).build().await;
        let mut events = engine.subscribe();

        let dispatch = tokio::spawn({
            let engine = engine.clone();
            async move { engine.dispatch("a1", "uptime", CommandType::Bash, 100).await }
        });
        let id = loop {
            if let HistoryEvent::Appended(entry) = events.recv().await.unwrap() {
                break entry.id;
            }
        };
        assert!(engine.timer_armed(&id));

        tokio::time::sleep(Duration::from_millis(1000)).await;
        let entry = engine.entry(&id).await.unwrap();
        assert_eq!(entry.status, CommandStatus::TimedOut);
        assert!(!engine.is_pending(&id).await);
        assert!(!engine.timer_armed(&id));
        assert!(!dispatch.is_finished());
        dispatch.abort();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_offline_racing_dispatch_leaves_nothing_in_flight() {
        let (engine, _outbound) = engine().await;
        let status = |status| {
            InboundEvent::AgentStatus(AgentStatusUpdate {
                agent_id: "a1".to_string(),
                status,
            })
        };

        for _ in 0..200 {
            engine.handle_event(status(AgentStatus::Online)).await;

            let dispatch = tokio::spawn({
                let engine = engine.clone();
                async move { engine.dispatch("a1", "uptime", CommandType::Bash, 60_000).await }
            });
            let offline = tokio::spawn({
                let engine = engine.clone();
                let event = status(AgentStatus::Offline);
                async move { engine.handle_event(event).await }
            });
            let dispatched = dispatch.await.unwrap();
            offline.await.unwrap();

            match dispatched {
                Ok(id) => {
                    assert!(!engine.is_pending(&id).await);
                    assert!(!engine.timer_armed(&id));
                    let entry = engine.entry(&id).await.unwrap();
                    assert_eq!(entry.failure, Some(FailureKind::AgentDisconnected));
                }
                Err(e) => assert_eq!(e, DispatchError::AgentOffline("a1".to_string())),
            }
            assert_eq!(engine.pending_count().await, 0);
        }
    }

    #[tokio::test]
    async fn test_completion_then_timeout_single_terminal() {
        let (engine, _outbound) = engine().await;
        let id = engine.dispatch("a1", "ls", CommandType::Bash, 60_000).await.unwrap();

        assert_eq!(
            engine.resolve(&id, Outcome::completed("a b")).await,
            Reconciliation::Applied(CommandStatus::Completed)
        );
        assert_eq!(engine.expire(&id).await, Reconciliation::Dropped);
        assert_eq!(engine.entry(&id).await.unwrap().status, CommandStatus::Completed);
    }

    #[tokio::test]
    async fn test_timeout_then_completion_single_terminal() {
        let (engine, _outbound) = engine().await;
        let id = engine.dispatch("a1", "ls", CommandType::Bash, 60_000).await.unwrap();

        assert_eq!(
            engine.expire(&id).await,
            Reconciliation::Applied(CommandStatus::TimedOut)
        );
        assert_eq!(
            engine.resolve(&id, Outcome::completed("late")).await,
            Reconciliation::Dropped
        );
        let entry = engine.entry(&id).await.unwrap();
        assert_eq!(entry.status, CommandStatus::TimedOut);
        assert_eq!(entry.output, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_settle_applies_once() {
        let (engine, _outbound) = engine().await;
        for _ in 0..50 {
            let id = engine.dispatch("a1", "ls", CommandType::Bash, 60_000).await.unwrap();
            let (a, b, c) = tokio::join!(
                tokio::spawn({
                    let (engine, id) = (engine.clone(), id.clone());
                    async move { engine.resolve(&id, Outcome::completed("ok")).await }
                }),
                tokio::spawn({
                    let (engine, id) = (engine.clone(), id.clone());
                    async move { engine.expire(&id).await }
                }),
                tokio::spawn({
                    let (engine, id) = (engine.clone(), id.clone());
                    async move { engine.cancel(&id).await }
                }),
            );
            let applied = [a.unwrap(), b.unwrap(), c.unwrap()]
                .iter()
                .filter(|r| r.is_applied())
                .count();
            assert_eq!(applied, 1);
            assert!(engine.entry(&id).await.unwrap().status.is_terminal());
        }
        assert_eq!(engine.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_duplicate_completion_is_ignored() {
        let (engine, _outbound) = engine().await;
        let id = engine.dispatch("a1", "whoami", CommandType::Bash, 60_000).await.unwrap();

        engine.resolve(&id, Outcome::completed("root")).await;
        let after_first = engine.history().await;

        assert_eq!(
            engine.resolve(&id, Outcome::completed("admin")).await,
            Reconciliation::Dropped
        );
        assert_eq!(
            engine.resolve(&id, Outcome::failed("boom")).await,
            Reconciliation::Dropped
        );
        assert_eq!(engine.history().await, after_first);
    }

    #[tokio::test]
    async fn test_unknown_completion_dropped() {
        let (engine, _outbound) = engine().await;
        let outcome = engine
            .resolve(&CorrelationId::from("cmd_nope"), Outcome::completed("x"))
            .await;
        assert_eq!(outcome, Reconciliation::Dropped);
        assert!(engine.history().await.is_empty());
    }

    #[tokio::test]
    async fn test_history_keeps_submission_order() {
        let (engine, _outbound) = engine().await;
        let a = engine.dispatch("a1", "echo a", CommandType::Bash, 60_000).await.unwrap();
        let b = engine.dispatch("a2", "echo b", CommandType::Bash, 60_000).await.unwrap();

        engine.resolve(&b, Outcome::completed("b")).await;

        let history = engine.history().await;
        let ids: Vec<_> = history.iter().map(|e| e.id.clone()).collect();
        assert_eq!(ids, vec![a, b]);
        assert_eq!(history[0].status, CommandStatus::Pending);
        assert_eq!(history[1].status, CommandStatus::Completed);
    }

    #[tokio::test]
    async fn test_correlation_ids_unique() {
        let (engine, _outbound) = engine().await;
        let mut seen = HashSet::new();
        for i in 0..500 {
            let id = engine
                .dispatch("a1", format!("echo {}", i), CommandType::Bash, 60_000)
                .await
                .unwrap();
            assert!(seen.insert(id));
        }
        assert_eq!(engine.pending_count().await, 500);
    }

    #[tokio::test]
    async fn test_acknowledgement_marks_executing() {
        let (engine, _outbound) = engine().await;
        let id = engine.dispatch("a1", "make", CommandType::Bash, 60_000).await.unwrap();

        let ack = InboundEvent::Acknowledged(Acknowledgement {
            correlation_id: id.clone(),
        });
        engine.handle_event(ack.clone()).await;
        assert_eq!(engine.record(&id).await.unwrap().status, CommandStatus::Executing);
        assert_eq!(engine.acknowledge(&id).await, Reconciliation::Dropped);

        engine.resolve(&id, Outcome::failed("exit 2")).await;
        let entry = engine.entry(&id).await.unwrap();
        assert_eq!(entry.status, CommandStatus::Failed);
        assert_eq!(entry.failure, Some(FailureKind::RemoteExecution));

        // 终态后迟到的确认不会回退状态
        engine.handle_event(ack).await;
        assert_eq!(engine.entry(&id).await.unwrap().status, CommandStatus::Failed);
    }

    #[tokio::test]
    async fn test_precondition_failures_leave_no_trace() {
        let (engine, mut outbound) = engine().await;

        assert_eq!(
            engine.dispatch("a1", "ls", CommandType::Bash, 0).await.unwrap_err(),
            DispatchError::InvalidTimeout
        );
        assert_eq!(
            engine.dispatch("ghost", "ls", CommandType::Bash, 1000).await.unwrap_err(),
            DispatchError::UnknownAgent("ghost".to_string())
        );
        assert_eq!(
            engine.submit("ghost", OperatorInput::shell("ls")).await.unwrap_err(),
            CommandError::UnknownAgent("ghost".to_string())
        );
        assert!(engine.history().await.is_empty());
        assert!(outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_transport_failure_marks_dispatch_failed() {
        let engine = builder(Arc::new(RejectingTransport)).build().await;

        let err = engine.dispatch("a1", "ls", CommandType::Bash, 1000).await.unwrap_err();
        let (correlation_id, reason) = match err {
            DispatchError::Transport { correlation_id, reason } => (correlation_id, reason),
            other => panic!("expected transport error, got {:?}", other),
        };
        assert!(reason.contains("socket closed"));

        let entry = engine.entry(&correlation_id).await.unwrap();
        assert_eq!(entry.status, CommandStatus::Failed);
        assert_eq!(entry.failure, Some(FailureKind::Dispatch));
        assert_eq!(engine.pending_count().await, 0);
        assert!(!engine.timer_armed(&correlation_id));
    }

    #[tokio::test]
    async fn test_relay_receives_terminal_records() {
        let sink = Arc::new(CapturingSink::default());
        let (transport, _outbound) = ChannelTransport::new();
        let engine = builder(Arc::new(transport))
            .with_relay_sink(sink.clone())
            .build()
            .await;

        let id = engine.dispatch("a1", "whoami", CommandType::Bash, 60_000).await.unwrap();
        engine.resolve(&id, Outcome::completed("root")).await;

        for _ in 0..50 {
            if !sink.delivered.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let delivered = sink.delivered.lock().unwrap().clone();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].agent_name, "web-01");
        assert_eq!(delivered[0].command, "whoami");
        assert_eq!(delivered[0].status, CommandStatus::Completed);
        assert_eq!(delivered[0].output.as_deref(), Some("root"));
    }

    #[tokio::test]
    async fn test_relay_failure_does_not_touch_record() {
        let (transport, _outbound) = ChannelTransport::new();
        let engine = builder(Arc::new(transport))
            .with_relay_sink(Arc::new(DownSink))
            .build()
            .await;
        let mut diagnostics = engine.relay_diagnostics();

        let id = engine.dispatch("a1", "whoami", CommandType::Bash, 60_000).await.unwrap();
        engine.resolve(&id, Outcome::completed("root")).await;
        let before = engine.entry(&id).await.unwrap();

        let diag = diagnostics.recv().await.unwrap();
        assert_eq!(diag.correlation_id, id);
        assert!(diag.error.contains("503"));
        assert_eq!(engine.entry(&id).await.unwrap(), before);
        assert_eq!(before.status, CommandStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_links_to_cause() {
        let (engine, mut outbound) = engine().await;
        let mut events = engine.subscribe();

        let original = engine.dispatch("a1", "apt update", CommandType::Bash, 100).await.unwrap();
        wait_for_status(&mut events, &original, CommandStatus::TimedOut).await;

        let retried = engine.retry(&original).await.unwrap();
        assert_ne!(retried, original);

        let entry = engine.entry(&retried).await.unwrap();
        assert_eq!(entry.cause_id.as_ref(), Some(&original));
        assert_eq!(entry.retry_count, 1);
        assert_eq!(entry.command.as_deref(), Some("apt update"));
        assert_eq!(entry.timeout_ms, 100);
        assert_eq!(entry.status, CommandStatus::Pending);

        let sent: Vec<_> = std::iter::from_fn(|| outbound.try_recv().ok()).collect();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].correlation_id, retried);

        // 在途指令不能重试
        assert!(matches!(
            engine.retry(&retried).await,
            Err(CommandError::NotRetryable { .. })
        ));
    }

    #[tokio::test]
    async fn test_completed_or_translation_failure_not_retryable() {
        let (engine, _outbound) = engine().await;
        let id = engine.dispatch("a1", "ls", CommandType::Bash, 60_000).await.unwrap();
        engine.resolve(&id, Outcome::completed("")).await;
        assert!(matches!(
            engine.retry(&id).await,
            Err(CommandError::NotRetryable { status: CommandStatus::Completed, .. })
        ));

        let _ = engine.submit("a1", OperatorInput::shell("")).await;
        let failed = engine.history().await.pop().unwrap();
        assert_eq!(failed.failure, Some(FailureKind::Translation));
        assert!(matches!(
            engine.retry(&failed.id).await,
            Err(CommandError::NotRetryable { .. })
        ));

        assert!(matches!(
            engine.retry(&CorrelationId::from("cmd_missing")).await,
            Err(CommandError::UnknownCorrelation(_))
        ));
    }

    #[tokio::test]
    async fn test_bounded_history_evicts_terminal_entries() {
        let (transport, _outbound) = ChannelTransport::new();
        let engine = builder(Arc::new(transport))
            .with_history_capacity(2)
            .build()
            .await;
        let mut events = engine.subscribe();

        let a = engine.dispatch("a1", "echo a", CommandType::Bash, 60_000).await.unwrap();
        engine.resolve(&a, Outcome::completed("a")).await;
        let b = engine.dispatch("a1", "echo b", CommandType::Bash, 60_000).await.unwrap();
        let c = engine.dispatch("a1", "echo c", CommandType::Bash, 60_000).await.unwrap();

        let ids: Vec<_> = engine.history().await.into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![b, c]);

        let mut evicted = None;
        while let Ok(event) = events.try_recv() {
            if let HistoryEvent::Evicted(id) = event {
                evicted = Some(id);
            }
        }
        assert_eq!(evicted, Some(a));
    }

    #[tokio::test]
    async fn test_overflow_evicted_when_in_flight_entries_settle() {
        let (transport, _outbound) = ChannelTransport::new();
        let engine = builder(Arc::new(transport))
            .with_history_capacity(1)
            .build()
            .await;
        let mut events = engine.subscribe();

        let a = engine.dispatch("a1", "echo a", CommandType::Bash, 60_000).await.unwrap();
        let b = engine.dispatch("a1", "echo b", CommandType::Bash, 60_000).await.unwrap();
        // 两条都在途，暂时超出容量
        assert_eq!(engine.history().await.len(), 2);

        engine.resolve(&a, Outcome::completed("a")).await;
        engine.resolve(&b, Outcome::completed("b")).await;

        let history = engine.history().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, b);
        assert_eq!(history[0].status, CommandStatus::Completed);

        let evicted: Vec<_> = std::iter::from_fn(|| events.try_recv().ok())
            .filter_map(|event| match event {
                HistoryEvent::Evicted(id) => Some(id),
                _ => None,
            })
            .collect();
        assert_eq!(evicted, vec![a]);
    }

    #[tokio::test]
    async fn test_run_loop_consumes_inbound_until_shutdown() {
        let (engine, mut outbound) = engine().await;
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn({
            let engine = engine.clone();
            let shutdown = shutdown.clone();
            async move { engine.run(inbound_rx, shutdown).await }
        });

        let mut events = engine.subscribe();
        let id = engine.submit("a1", OperatorInput::shell("df -h")).await.unwrap();
        let sent = outbound.recv().await.unwrap();
        inbound_tx
            .send(InboundEvent::Completion(CompletionEvent::completed(
                sent.correlation_id,
                "Filesystem ...",
            )))
            .unwrap();
        wait_for_status(&mut events, &id, CommandStatus::Completed).await;

        let pending = engine.dispatch("a1", "sleep 60", CommandType::Bash, 60_000).await.unwrap();
        assert!(engine.timer_armed(&pending));

        shutdown.cancel();
        handle.await.unwrap();
        assert!(!engine.timer_armed(&pending));
    }
}

mod common;

use cadence_pipeline::{
    CancellationRegistry, LatestTurnArbiter, PipelineError, PipelineSettings, TurnDispatcher,
    TurnLookup, TurnState,
};
use cadence_types::{ConversationId, Turn, TurnId};
use common::*;
use std::time::Duration;

fn dispatcher(fakes: &Fakes, settings: PipelineSettings) -> TurnDispatcher {
    TurnDispatcher::new(
        fakes.orchestrator(settings),
        CancellationRegistry::new(),
        LatestTurnArbiter::new(),
    )
}

#[tokio::test]
async fn newer_turn_cancels_and_supersedes_older() {
    let (generator, gate) = FakeGenerator::gated(&["Fresh answer."]);
    let fakes = Fakes::new(generator);
    let dispatcher = dispatcher(&fakes, PipelineSettings::default());
    let conv = ConversationId::from("conv-1");

    let mut old = dispatcher
        .dispatch(Turn::text("conv-1", "100", "tell me a story"))
        .unwrap();
    gate.send(delta("Once upon a time.")).unwrap();
    let first = old.consumer.get().await.unwrap();
    assert_eq!(first.stream_seq, 1);

    let mut new = dispatcher
        .dispatch(Turn::text("conv-1", "101", "actually, stop"))
        .unwrap();
    assert!(dispatcher.registry().is_cancelled(&conv, &TurnId::from("100")));
    assert!(!dispatcher.arbiter().is_latest(&conv, &TurnId::from("100")));
    assert!(dispatcher.arbiter().is_latest(&conv, &TurnId::from("101")));

    let _ = gate.send(delta(" There lived a very quiet fox."));
    let _ = gate.send(GenStep::End);
    assert!(old.consumer.get().await.unwrap().is_sentinel());
    let old_outcome = old.task.await.unwrap();
    assert_eq!(old_outcome.state, TurnState::Cancelled);

    let chunks = drain(&mut new.consumer).await;
    assert_eq!(texts(&chunks), vec!["Fresh answer."]);
    assert!(chunks.last().unwrap().is_sentinel());
    assert_eq!(new.task.await.unwrap().state, TurnState::Complete);

    assert!(dispatcher.registry().is_empty());
}

#[tokio::test]
async fn older_turn_arriving_late_is_refused() {
    let fakes = Fakes::new(FakeGenerator::answering(&["Hi."]));
    let dispatcher = dispatcher(&fakes, PipelineSettings::default());

    let mut newer = dispatcher.dispatch(Turn::text("conv-1", "101", "hi")).unwrap();
    let err = dispatcher
        .dispatch(Turn::text("conv-1", "100", "hello"))
        .unwrap_err();
    assert!(matches!(err, PipelineError::Stale { .. }));
    assert_eq!(err.kind(), None);

    drain(&mut newer.consumer).await;
    assert_eq!(fakes.generator.calls(), 1);
}

#[tokio::test]
async fn duplicate_in_flight_turn_is_rejected() {
    let (generator, gate) = FakeGenerator::gated(&[]);
    let fakes = Fakes::new(generator);
    let dispatcher = dispatcher(&fakes, PipelineSettings::default());

    let conv = ConversationId::from("conv-1");
    let mut first = dispatcher.dispatch(Turn::text("conv-1", "5", "hi")).unwrap();
    let err = dispatcher
        .dispatch(Turn::text("conv-1", "5", "hi"))
        .unwrap_err();
    assert_eq!(err, PipelineError::DuplicateTurn(TurnId::from("5")));
    assert!(!dispatcher.registry().is_cancelled(&conv, &TurnId::from("5")));

    gate.send(delta("Hello.")).unwrap();
    gate.send(GenStep::End).unwrap();
    let chunks = drain(&mut first.consumer).await;
    assert_eq!(texts(&chunks), vec!["Hello."]);
}

#[tokio::test]
async fn explicit_cancel_reaches_in_flight_turn() {
    let (generator, gate) = FakeGenerator::gated(&[]);
    let fakes = Fakes::new(generator);
    let dispatcher = dispatcher(&fakes, PipelineSettings::default());

    let conv = ConversationId::from("conv-1");
    let mut handle = dispatcher.dispatch(Turn::text("conv-1", "7", "hi")).unwrap();
    assert!(!dispatcher.cancel(&ConversationId::from("conv-2"), &TurnId::from("7")));
    assert!(dispatcher.cancel(&conv, &TurnId::from("7")));
    assert!(!dispatcher.cancel(&conv, &TurnId::from("8")));

    let _ = gate.send(delta("Too late."));
    let _ = gate.send(GenStep::End);
    let chunks = drain(&mut handle.consumer).await;
    assert_eq!(chunks.len(), 1);
    assert!(chunks[0].is_sentinel());

    handle.task.await.unwrap();
    assert!(!dispatcher.cancel(&conv, &TurnId::from("7")));
}

#[tokio::test]
async fn conversations_do_not_cancel_each_other() {
    let fakes = Fakes::new(FakeGenerator::answering(&["Hi there."]));
    let dispatcher = dispatcher(&fakes, PipelineSettings::default());

    let mut a = dispatcher.dispatch(Turn::text("conv-a", "2", "hi")).unwrap();
    let mut b = dispatcher.dispatch(Turn::text("conv-b", "1", "hi")).unwrap();

    assert_eq!(texts(&drain(&mut a.consumer).await), vec!["Hi there."]);
    assert_eq!(texts(&drain(&mut b.consumer).await), vec!["Hi there."]);
}

#[tokio::test]
async fn conversations_may_reuse_turn_ids() {
    let fakes = Fakes::new(FakeGenerator::answering(&["Hello to you."]));
    let dispatcher = dispatcher(&fakes, PipelineSettings::default());
    let conv_a = ConversationId::from("conv-a");
    let conv_b = ConversationId::from("conv-b");

    let mut a = dispatcher.dispatch(Turn::text("conv-a", "1", "hi")).unwrap();
    let mut b = dispatcher
        .dispatch(Turn::text("conv-b", "1", "hello"))
        .unwrap();
    assert_eq!(dispatcher.registry().len(), 2);
    assert_eq!(
        dispatcher.cancel_turn(&TurnId::from("1")),
        TurnLookup::Ambiguous
    );

    assert!(dispatcher.cancel(&conv_a, &TurnId::from("1")));
    assert!(dispatcher.registry().is_cancelled(&conv_a, &TurnId::from("1")));
    assert!(!dispatcher.registry().is_cancelled(&conv_b, &TurnId::from("1")));

    let chunks = drain(&mut a.consumer).await;
    assert_eq!(chunks.len(), 1);
    assert!(chunks[0].is_sentinel());

    let chunks = drain(&mut b.consumer).await;
    assert_eq!(texts(&chunks), vec!["Hello to you."]);
    assert_eq!(b.task.await.unwrap().state, TurnState::Complete);
}

#[tokio::test]
async fn chunks_stay_in_order_under_backpressure() {
    let text: String = (1..=20)
        .map(|i| format!("Sentence number {} is here. ", i))
        .collect();
    let fakes = Fakes::new(FakeGenerator::answering(&[text.as_str()])).with_synthesizer(
        FakeSynthesizer {
            delay: Some(Duration::from_millis(1)),
            ..Default::default()
        },
    );
    let dispatcher = dispatcher(
        &fakes,
        PipelineSettings {
            min_sentence_length: 4,
            ..Default::default()
        },
    )
    .with_queue_capacity(2);

    let mut handle = dispatcher.dispatch(Turn::text("conv-1", "1", "count")).unwrap();

    let mut chunks = Vec::new();
    while let Some(chunk) = handle.consumer.get().await {
        if chunk.stream_seq % 3 == 0 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        } else {
            tokio::task::yield_now().await;
        }
        chunks.push(chunk);
    }

    let (sentinel, audio) = chunks.split_last().unwrap();
    assert!(sentinel.is_sentinel());
    let seqs: Vec<i64> = audio.iter().map(|c| c.stream_seq).collect();
    let expected: Vec<i64> = (1..=audio.len() as i64).collect();
    assert_eq!(seqs, expected);
    assert_eq!(texts(audio).concat(), text.trim());
    assert_eq!(fakes.synthesizer.spoken(), texts(audio));
}

//! Full rounds through the coordinator

use super::*;
use crate::{decode_payload, RoundReport};
use keel_consensus::{round_seed, RejectReason, VotePhase};
use keel_settlement::BatchStatus;
use keel_types::ZERO_HASH;
use std::time::Duration;

#[tokio::test]
async fn test_idle_without_pending_transactions() {
    let mut n = node(test_config(300), &honest(4), 4);
    let report = n.coordinator.run_round(&mut n.shutdown).await.unwrap();
    assert_eq!(report, RoundReport::Idle);
    assert_eq!(n.coordinator.consensus().current_round(), 0);
    assert_eq!(n.coordinator.stats().idle_ticks, 1);
}

#[tokio::test]
async fn test_round_finalizes_settles_and_posts() {
    let mut n = node(test_config(1_000), &honest(10), 8);
    let mut events = n.coordinator.subscribe();
    let sender = n.coordinator.transaction_sender();
    let txs: Vec<Transaction> = (0..5).map(|i| tx(1_000 * (i + 1), 0, i)).collect();
    for t in &txs {
        sender.send(t.clone()).unwrap();
    }

    let report = n.coordinator.run_round(&mut n.shutdown).await.unwrap();
    let RoundReport::Finalized {
        round,
        batch_id,
        tx_count,
        state_root,
        da_commitment,
        availability_confidence,
    } = report
    else {
        panic!("expected finalization, got {:?}", report);
    };
    assert_eq!(round, 1);
    assert_eq!(tx_count, 5);
    assert_eq!(availability_confidence, Some(1.0));

    let batch = n.coordinator.settlement().get(batch_id).unwrap();
    assert_eq!(batch.status, BatchStatus::Finalized);
    assert_eq!(batch.state_root, state_root);
    assert_eq!(batch.round, Some(1));
    assert!(n.coordinator.consensus().is_finalized(batch_id));
    assert_eq!(n.coordinator.consensus().last_commitment(), batch.commitment);
    assert_eq!(n.coordinator.sequencer().pending_len(), 0);

    let event = events.try_recv().unwrap();
    assert_eq!(event.batch_id, batch_id);
    assert_eq!(event.tx_hashes, batch.tx_hashes);
    assert_eq!(event.da_commitment, da_commitment);

    // the DA payload is the ordered batch
    let payload = n.coordinator.da().reconstruct(batch_id).await.unwrap();
    assert!(n.coordinator.da().verify_commitment(batch_id, &payload).unwrap());
    let ordered: Vec<_> = decode_payload(&payload).unwrap().into_iter().map(|t| t.hash).collect();
    assert_eq!(ordered, batch.tx_hashes);

    // highest value first
    assert_eq!(ordered[0], txs[4].hash);

    assert_eq!(n.coordinator.run_round(&mut n.shutdown).await.unwrap(), RoundReport::Idle);
}

#[tokio::test]
async fn test_rejected_round_keeps_transactions_for_next_round() {
    let mut behaviors = honest(6);
    behaviors.extend([VoterBehavior::PreVoteOnly; 4]);
    let mut n = node(test_config(100), &behaviors, 4);
    let t = tx(500, 0, 1);
    n.coordinator.transaction_sender().send(t.clone()).unwrap();

    let report = n.coordinator.run_round(&mut n.shutdown).await.unwrap();
    let RoundReport::Rejected { batch_id, reason, .. } = report else {
        panic!("expected rejection, got {:?}", report);
    };
    assert_eq!(reason, RejectReason::TimedOut(VotePhase::PreCommit));
    assert_eq!(n.coordinator.settlement().get(batch_id).unwrap().status, BatchStatus::Rejected);
    assert!(n.coordinator.sequencer().is_pending(&t.hash));
    assert!(n.coordinator.da().get(batch_id).is_none());

    // retried under a new batch id, still not enough pre-commits
    let report = n.coordinator.run_round(&mut n.shutdown).await.unwrap();
    match report {
        RoundReport::Rejected { round, batch_id: retry, .. } => {
            assert_eq!(round, 2);
            assert!(retry > batch_id);
        }
        other => panic!("expected rejection, got {:?}", other),
    }
}

#[tokio::test]
async fn test_da_failure_does_not_undo_finality() {
    let mut n = node(test_config(1_000), &honest(4), 0);
    n.coordinator.transaction_sender().send(tx(1, 0, 1)).unwrap();

    let report = n.coordinator.run_round(&mut n.shutdown).await.unwrap();
    let RoundReport::Finalized {
        batch_id,
        availability_confidence,
        ..
    } = report
    else {
        panic!("expected finalization, got {:?}", report);
    };
    assert_eq!(availability_confidence, None);
    assert_eq!(n.coordinator.settlement().get(batch_id).unwrap().status, BatchStatus::Finalized);
    assert_eq!(n.coordinator.stats().da_failures, 1);
}

#[tokio::test]
async fn test_shutdown_cancels_round() {
    let mut n = node(test_config(5_000), &[VoterBehavior::Silent; 4], 4);
    n.coordinator.transaction_sender().send(tx(1, 0, 1)).unwrap();

    let shutdown_tx = n.shutdown_tx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = shutdown_tx.send(true);
    });

    let report = n.coordinator.run_round(&mut n.shutdown).await.unwrap();
    let RoundReport::Cancelled { batch_id, .. } = report else {
        panic!("expected cancellation, got {:?}", report);
    };
    assert_eq!(n.coordinator.settlement().get(batch_id).unwrap().status, BatchStatus::Rejected);
    assert!(n.coordinator.consensus().decision(batch_id).is_none());
}

#[tokio::test]
async fn test_run_loop_stops_after_max_rounds() {
    let mut config = test_config(1_000);
    config.pipeline.round_interval_ms = 10;
    let n = node(config, &honest(4), 4);
    let sender = n.coordinator.transaction_sender();
    for i in 0..3 {
        sender.send(tx(10, 0, i)).unwrap();
    }
    let mut events = n.coordinator.subscribe();
    let shutdown = n.shutdown.clone();

    let stats = tokio::time::timeout(Duration::from_secs(10), n.coordinator.run(shutdown, Some(1)))
        .await
        .unwrap();
    assert_eq!(stats.finalized, 1);
    assert_eq!(stats.transactions_finalized, 3);
    assert_eq!(events.try_recv().unwrap().tx_hashes.len(), 3);
}

#[tokio::test]
async fn test_proposal_carries_reference_time_for_replay() {
    let mut n = node(test_config(1_000), &honest(4), 4);
    let mut feed = n.coordinator.gossip().subscribe();
    let sender = n.coordinator.transaction_sender();
    let txs = vec![tx(0, 50_000, 1), tx(300_000, 0, 2), tx(5_000, 20_000, 3)];
    for t in &txs {
        sender.send(t.clone()).unwrap();
    }

    let before = unix_millis();
    let report = n.coordinator.run_round(&mut n.shutdown).await.unwrap();
    assert!(report.is_finalized());

    let proposal = feed.recv().await.unwrap();
    assert!(proposal.reference_ms >= before);
    assert!(proposal.reference_ms <= unix_millis());

    // Any validator holding the transactions re-derives the same order
    let seed = round_seed(&ZERO_HASH, proposal.round);
    let sequencer = n.coordinator.sequencer();
    assert_eq!(sequencer.replay(txs.clone(), proposal.reference_ms, &seed), proposal.tx_hashes);
    assert_ne!(sequencer.replay(txs, proposal.reference_ms + 60_000, &seed), proposal.tx_hashes);
}

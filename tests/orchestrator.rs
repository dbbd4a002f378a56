mod common;

use std::{env, fs};

use common::{FixedShards, all_close, config, filled, orchestrator};
use machine_learning::{
    ParamState, Segment,
    arch::{Sequential, layers::Layer},
    initialization::ConstParamGen,
    optimization::GradientDescent,
};
use split_learning::{
    Mode, Orchestrator, Phase, SplitErr,
    config::RunConfig,
    context::RunContext,
    data::DatasetProvider,
    participant::Participant,
    server::ServerCounterpart,
    sink::{MemorySink, MetricEvent},
};
use rand::{SeedableRng, rngs::StdRng};

#[test]
fn fusion_is_weighted_by_train_samples() {
    let provider = FixedShards::new(&[10, 20, 30]);
    let (mut orch, _) = orchestrator(config(3), &provider);

    let ctx = orch.context_mut();
    for (i, value) in [1., 2., 3.].into_iter().enumerate() {
        let (p, s) = ctx.pair_mut(i).unwrap();
        let back = filled(&p.back_state().unwrap(), value);
        let center_back = filled(&s.center_back_state().unwrap(), value);

        p.load_back_state(&back).unwrap();
        s.load_center_back_state(&center_back).unwrap();
    }

    orch.merge_model_weights(0).unwrap();

    let expected = (10. + 40. + 90.) / 60.;
    for (p, s) in orch.context().participants().iter().zip(orch.context().servers()) {
        assert!(all_close(&p.back_state().unwrap(), expected));
        assert!(all_close(&s.center_back_state().unwrap(), expected));
    }
}

#[test]
fn participants_without_train_samples_stay_out_of_the_pool() {
    let provider = FixedShards::new(&[10, 30, 0]);
    let (mut orch, _) = orchestrator(config(3), &provider);

    let ctx = orch.context_mut();
    for (i, value) in [1., 5., 9.].into_iter().enumerate() {
        let p = ctx.participant_mut(i).unwrap();
        let back = filled(&p.back_state().unwrap(), value);
        p.load_back_state(&back).unwrap();
    }

    orch.merge_model_weights(0).unwrap();

    let participants = orch.context().participants();
    assert!(all_close(&participants[0].back_state().unwrap(), 4.));
    assert!(all_close(&participants[1].back_state().unwrap(), 4.));
    assert!(all_close(&participants[2].back_state().unwrap(), 9.));
}

#[test]
fn a_training_epoch_ends_with_shared_trainable_segments() {
    let provider = FixedShards::new(&[8, 12, 16]);
    let (mut orch, _) = orchestrator(config(3), &provider);

    orch.populate(0).unwrap();
    orch.train_one_epoch(0).unwrap();

    let ctx = orch.context();
    let back = ctx.participants()[0].back_state().unwrap();
    let center_back = ctx.servers()[0].center_back_state().unwrap();

    for (p, s) in ctx.participants().iter().zip(ctx.servers()) {
        assert_eq!(p.back_state().unwrap(), back);
        assert_eq!(s.center_back_state().unwrap(), center_back);
    }
}

#[test]
fn caches_are_refreshed_every_refresh_rate_epochs() {
    let provider = FixedShards::new(&[8, 8]);
    let config = RunConfig {
        epochs: 5,
        refresh_rate: 2,
        ..config(2)
    };
    let (mut orch, _) = orchestrator(config, &provider);

    let mut puts = Vec::new();
    for epoch in 0..5 {
        orch.run_epoch(epoch).unwrap();
        puts.push(orch.context().servers()[0].cache_stats(Mode::Train).puts);
    }

    // One window of 8 train rows per population, reused on the epoch that follows it.
    assert_eq!(puts, [8, 8, 16, 16, 24]);

    for s in orch.context().servers() {
        assert_eq!(s.cache_stats(Mode::Train).clears, 3);
        assert_eq!(s.cached(Mode::Train), 8);
    }

    orch.release();
    assert_eq!(orch.context().servers()[0].cache_stats(Mode::Train).clears, 4);
}

#[test]
fn fit_refreshes_at_every_multiple_of_the_refresh_rate() {
    let provider = FixedShards::new(&[8, 8]);
    let config = RunConfig {
        epochs: 5,
        refresh_rate: 2,
        ..config(2)
    };
    let (mut orch, _) = orchestrator(config, &provider);

    let summary = orch.fit().unwrap();
    assert_eq!(summary.populations, [0, 2, 4]);

    for s in orch.context().servers() {
        assert_eq!(s.cached(Mode::Train), 0);
    }
}

#[test]
fn zero_refresh_rate_populates_once() {
    let provider = FixedShards::new(&[8, 8]);
    let config = RunConfig {
        epochs: 4,
        refresh_rate: 0,
        refresh_factor: 2,
        ..config(2)
    };
    let (mut orch, _) = orchestrator(config, &provider);

    let summary = orch.fit().unwrap();
    assert_eq!(summary.populations, [0]);
    assert_eq!(summary.train_f1.len(), 4);
}

#[test]
fn direct_execution_never_caches() {
    let provider = FixedShards::new(&[8, 8]);
    let config = RunConfig {
        use_cache: false,
        ..config(2)
    };
    let (mut orch, _) = orchestrator(config, &provider);

    let summary = orch.fit().unwrap();
    assert!(summary.populations.is_empty());

    for s in orch.context().servers() {
        assert_eq!(s.cache_stats(Mode::Train).puts, 0);
    }
}

#[test]
fn personalization_freezes_center_back_for_good() {
    let provider = FixedShards::new(&[8, 12]);
    let (mut orch, _) = orchestrator(config(2), &provider);

    orch.populate(0).unwrap();
    let mut frozen = Vec::new();

    for epoch in 0..5 {
        if epoch == 3 {
            orch.personalize(epoch).unwrap();
            frozen = orch
                .context()
                .servers()
                .iter()
                .map(|s| s.center_back_state().unwrap())
                .collect();
        }

        orch.train_one_epoch(epoch).unwrap();
        orch.test_one_epoch(epoch).unwrap();
    }

    for (s, state) in orch.context().servers().iter().zip(&frozen) {
        assert_eq!(&s.center_back_state().unwrap(), state);
        assert_eq!(s.frozen_at(), Some(3));
    }
}

#[test]
fn frozen_counterparts_refuse_new_weights() {
    let provider = FixedShards::new(&[8, 12]);
    let (mut orch, _) = orchestrator(config(2), &provider);

    orch.personalize(1).unwrap();

    let s = orch.context_mut().server_mut(0).unwrap();
    s.freeze(4);
    assert_eq!(s.frozen_at(), Some(1));

    let state = s.center_back_state().unwrap();
    let err = s.load_center_back_state(&state).unwrap_err();
    assert!(matches!(err, SplitErr::Ml(_)));
}

#[test]
fn back_fusion_can_stop_while_personalizing() {
    let provider = FixedShards::new(&[8, 12]);
    let config = RunConfig {
        merge_back_while_personalizing: false,
        ..config(2)
    };
    let (mut orch, _) = orchestrator(config, &provider);

    orch.populate(0).unwrap();
    orch.personalize(0).unwrap();
    orch.train_one_epoch(0).unwrap();

    let participants = orch.context().participants();
    assert_ne!(
        participants[0].back_state().unwrap(),
        participants[1].back_state().unwrap()
    );
}

#[test]
fn epoch_metrics_average_over_participants() {
    let provider = FixedShards::new(&[8, 12, 16]);
    let (mut orch, sink) = orchestrator(config(3), &provider);

    let summary = orch.fit().unwrap();
    let events = sink.events();

    for (epoch, &train_f1) in summary.train_f1.iter().enumerate() {
        let f1s: Vec<f32> = events
            .iter()
            .filter_map(|e| match e {
                MetricEvent::Participant {
                    epoch: ep,
                    mode: Mode::Train,
                    f1,
                    ..
                } if *ep == epoch => Some(*f1),
                _ => None,
            })
            .collect();

        assert_eq!(f1s.len(), 3);
        let mean = f1s.iter().sum::<f32>() / 3.;
        assert!((mean - train_f1).abs() < 1e-6);
    }

    let steps = events
        .iter()
        .filter(|e| matches!(e, MetricEvent::Step { mode: Mode::Train, epoch: 0, .. }))
        .count();
    assert_eq!(steps, 2 + 3 + 4);
}

#[test]
fn best_test_f1_is_the_maximum_seen() {
    let provider = FixedShards::new(&[8, 12]);
    let (mut orch, _) = orchestrator(config(2), &provider);

    let summary = orch.fit().unwrap();
    let max = summary.test_f1.iter().copied().fold(f32::MIN, f32::max);

    assert_eq!(summary.best_test_f1, Some(max));
    assert_eq!(summary.test_f1[summary.best_epoch.unwrap()], max);
}

#[test]
fn unknown_segment_configs_fail_at_setup() {
    let provider = FixedShards::new(&[8]);
    let config = RunConfig {
        segments: "resnet".into(),
        ..config(1)
    };

    let err = split_learning::Orchestrator::setup(
        config,
        &provider,
        &split_learning::registry::SegmentRegistry::new(),
        Box::new(split_learning::sink::MemorySink::new()),
    )
    .err();

    assert!(matches!(
        err,
        Some(SplitErr::Run { ref source, .. }) if matches!(**source, SplitErr::UnknownConfig(_))
    ));
}

/// Every value of `states` mixed with `weights`, computed in `f64`.
fn weighted_mean(states: &[ParamState], weights: &[f64]) -> ParamState {
    let total: f64 = weights.iter().sum();

    states[0]
        .iter()
        .map(|(name, first)| {
            let mut acc = first.mapv(|_| 0f64);
            for (state, &w) in states.iter().zip(weights) {
                acc.zip_mut_with(state.get(name).unwrap(), |a, &v| *a += v as f64 * w);
            }

            (name.clone(), acc.mapv(|v| (v / total) as f32))
        })
        .collect()
}

fn close(a: &ParamState, b: &ParamState) -> bool {
    a.iter().all(|(name, t)| {
        let other = b.get(name).unwrap();
        t.shape() == other.shape() && t.iter().zip(other.iter()).all(|(x, y)| (x - y).abs() < 1e-5)
    })
}

#[test]
fn every_participant_starts_from_the_same_segments() {
    let provider = FixedShards::new(&[10, 20, 30]);
    let (orch, _) = orchestrator(config(3), &provider);

    let ctx = orch.context();
    let (p0, s0) = ctx.pair(0).unwrap();

    for i in 1..ctx.len() {
        let (p, s) = ctx.pair(i).unwrap();

        assert_eq!(p.front_state().unwrap(), p0.front_state().unwrap());
        assert_eq!(s.center_front_state().unwrap(), s0.center_front_state().unwrap());
        assert_eq!(s.center_back_state().unwrap(), s0.center_back_state().unwrap());
        assert_eq!(p.back_state().unwrap(), p0.back_state().unwrap());
    }
}

#[test]
fn a_trained_epoch_fuses_post_step_weights_by_sample_count() {
    let provider = FixedShards::new(&[10, 20, 30]);
    let config = RunConfig {
        refresh_factor: 1,
        ..config(3)
    };
    let (mut orch, _) = orchestrator(config, &provider);

    orch.populate(0).unwrap();
    orch.train_participants(0).unwrap();

    let ctx = orch.context();
    let center_backs: Vec<_> = ctx
        .servers()
        .iter()
        .map(|s| s.center_back_state().unwrap())
        .collect();
    let backs: Vec<_> = ctx
        .participants()
        .iter()
        .map(|p| p.back_state().unwrap())
        .collect();

    assert_ne!(center_backs[0], center_backs[2]);

    orch.merge_model_weights(0).unwrap();

    let weights = [10., 20., 30.];
    let center_back = weighted_mean(&center_backs, &weights);
    let back = weighted_mean(&backs, &weights);

    for (p, s) in orch.context().participants().iter().zip(orch.context().servers()) {
        assert!(close(&s.center_back_state().unwrap(), &center_back));
        assert!(close(&p.back_state().unwrap(), &back));
    }
}

#[test]
fn non_finite_losses_skip_the_step_and_the_run_goes_on() {
    let provider = FixedShards {
        poisoned: Some(1),
        ..FixedShards::new(&[8, 8])
    };
    let config = RunConfig {
        epochs: 2,
        ..config(2)
    };
    let (mut orch, _) = orchestrator(config, &provider);

    let summary = orch.fit().unwrap();

    // The poisoned sample sits in one batch of every epoch.
    assert_eq!(summary.skipped_steps, 2);
    assert_eq!(summary.train_f1.len(), 2);

    let back = orch.context().participants()[0].back_state().unwrap();
    assert!(back.iter().all(|(_, t)| t.iter().all(|v| v.is_finite())));
}

fn dense(name: &str, n: usize, m: usize) -> Segment {
    let model = Sequential::new([Layer::dense((n, m), None)]).unwrap();
    Segment::new(name, model, &mut ConstParamGen::new(0.1, n * m + m)).unwrap()
}

#[test]
fn a_width_mismatch_aborts_training() {
    let provider = FixedShards::new(&[8]);
    let shard = provider.shard(0, 1).unwrap();

    let participant = Participant::new(
        "ab12",
        dense("front", 2, 4),
        dense("back", 5, 3),
        Box::new(GradientDescent::new(0.1)),
        shard,
        4,
        StdRng::seed_from_u64(0),
    );
    let server = ServerCounterpart::new(
        "ab12",
        dense("center_front", 4, 4),
        dense("center_back", 4, 4),
        Box::new(GradientDescent::new(0.1)),
    );

    let ctx = RunContext::new(vec![participant], vec![server]).unwrap();
    let config = RunConfig {
        use_cache: false,
        ..config(1)
    };
    let mut orch = Orchestrator::new(config, ctx, Box::new(MemorySink::new())).unwrap();

    let err = orch.train_one_epoch(0).unwrap_err();
    assert!(matches!(
        err,
        SplitErr::Run { phase: Phase::Train, epoch: 0, ref participant, .. }
            if participant.as_deref() == Some("ab12")
    ));
}

#[test]
fn failing_checkpoint_saves_report_the_checkpoint_phase() {
    let blocker = env::temp_dir().join(format!("split_learning_blocker_{}", std::process::id()));
    fs::write(&blocker, b"not a directory").unwrap();

    let provider = FixedShards::new(&[8, 8]);
    let config = RunConfig {
        epochs: 1,
        checkpoint_dir: Some(blocker.clone()),
        ..config(2)
    };
    let (mut orch, _) = orchestrator(config, &provider);

    let err = orch.fit().unwrap_err();
    fs::remove_file(&blocker).ok();

    assert!(matches!(
        err,
        SplitErr::Run { phase: Phase::Checkpoint, .. }
    ));
}

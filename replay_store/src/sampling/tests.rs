//! Sampler behaviour over a live store.

use std::collections::HashMap;
use std::sync::Arc;

use super::*;
use crate::buffers::chunker::{ChunkMode, PaddingPolicy};
use crate::core::array::Array;
use crate::core::episode::{Episode, EpisodeId};
use crate::core::step::{Step, IS_FIRST, IS_LAST};
use crate::error::ReplayError;

fn make_episode(id: u64, len: usize) -> Episode {
    let steps = (0..len)
        .map(|i| {
            Step::new()
                .with("obs", Array::from_f32(vec![id as f32, i as f32]))
                .with("reward", Array::scalar_f32(1.0))
                .with_flag(IS_FIRST, i == 0)
                .with_flag(IS_LAST, i == len - 1)
        })
        .collect();
    Episode::new(EpisodeId(id), steps).unwrap()
}

fn store_with(capacity: usize, lens: &[usize]) -> Arc<EpisodeStore> {
    let store = Arc::new(EpisodeStore::new(capacity));
    for (id, &len) in lens.iter().enumerate() {
        store.insert(make_episode(id as u64, len)).unwrap();
    }
    store
}

fn chunker(length: usize, padding: PaddingPolicy) -> Chunker {
    Chunker::new(length, ChunkMode::NonOverlapping, padding)
}

fn keys(items: &[SampledChunk]) -> Vec<ChunkKey> {
    items.iter().map(SampledChunk::key).collect()
}

// ============================================================================
// FixedLength
// ============================================================================

#[test]
fn test_fixed_length_aligned_offsets() {
    let store = store_with(100, &[20]);
    let sampler = FixedLengthSampler::new(
        store,
        chunker(5, PaddingPolicy::Drop),
        FixedLengthConfig::new(),
        Some(1),
    );

    let mut seen = std::collections::BTreeSet::new();
    for _ in 0..100 {
        for item in sampler.sample(10).unwrap() {
            let offset = item.chunk.offset();
            assert_eq!(offset % 5, 0);
            assert!(offset <= 15);
            assert_eq!(item.chunk.len(), 5);
            assert!(item.weight.is_none());
            seen.insert(offset);
        }
    }
    assert_eq!(seen.into_iter().collect::<Vec<_>>(), vec![0, 5, 10, 15]);
}

#[test]
fn test_fixed_length_unaligned_offsets() {
    let store = store_with(100, &[10]);
    let sampler = FixedLengthSampler::new(
        store,
        chunker(4, PaddingPolicy::Drop),
        FixedLengthConfig::new().with_aligned(false),
        Some(2),
    );

    let mut seen = std::collections::BTreeSet::new();
    for item in sampler.sample(500).unwrap() {
        assert!(item.chunk.offset() <= 6);
        assert!(!item.chunk.is_padded());
        seen.insert(item.chunk.offset());
    }
    assert_eq!(seen.len(), 7);
}

#[test]
fn test_fixed_length_skips_short_episodes() {
    let store = store_with(100, &[2, 10, 3]);
    let sampler = FixedLengthSampler::new(
        store,
        chunker(4, PaddingPolicy::Drop),
        FixedLengthConfig::new(),
        Some(3),
    );
    for item in sampler.sample(200).unwrap() {
        assert_eq!(item.chunk.key().episode, EpisodeId(1));
    }
}

#[test]
fn test_fixed_length_exhausted_when_nothing_fits() {
    let store = store_with(100, &[2, 3]);
    let sampler = FixedLengthSampler::new(
        store,
        chunker(4, PaddingPolicy::Drop),
        FixedLengthConfig::new().with_max_retries(10),
        Some(4),
    );
    assert!(matches!(
        sampler.sample(1),
        Err(ReplayError::SampleExhausted { attempts: 10 })
    ));
}

#[test]
fn test_fixed_length_padded_tail() {
    let store = store_with(100, &[6]);
    let sampler = FixedLengthSampler::new(
        store,
        chunker(4, PaddingPolicy::RepeatLast),
        FixedLengthConfig::new(),
        Some(5),
    );
    let padded = sampler
        .sample(200)
        .unwrap()
        .into_iter()
        .filter(|item| item.chunk.offset() == 4)
        .inspect(|item| assert_eq!(item.chunk.valid_mask(), vec![true, true, false, false]))
        .count();
    assert!(padded > 0);
}

#[test]
fn test_fixed_seed_is_reproducible() {
    let run = |seed| {
        let store = store_with(200, &[7, 12, 20, 9]);
        let sampler = FixedLengthSampler::new(
            store,
            chunker(3, PaddingPolicy::Drop),
            FixedLengthConfig::new(),
            Some(seed),
        );
        keys(&sampler.sample(64).unwrap())
    };
    assert_eq!(run(42), run(42));
    assert_ne!(run(42), run(43));
}

#[test]
fn test_fixed_length_samples_concurrently() {
    let store = store_with(400, &[12, 12, 12, 12]);
    let sampler = Arc::new(FixedLengthSampler::new(
        Arc::clone(&store),
        chunker(4, PaddingPolicy::Drop),
        FixedLengthConfig::new(),
        Some(5),
    ));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let sampler = Arc::clone(&sampler);
            std::thread::spawn(move || {
                for _ in 0..50 {
                    let batch = sampler.sample(16).unwrap();
                    assert_eq!(batch.len(), 16);
                    assert!(batch.iter().all(|s| s.key().offset % 4 == 0));
                }
            })
        })
        .collect();
    for id in 4..20 {
        store.insert(make_episode(id, 12)).unwrap();
    }
    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn test_fixed_seed_reproducible_across_calls() {
    let run = || {
        let sampler = FixedLengthSampler::new(
            store_with(200, &[7, 12, 20, 9]),
            chunker(3, PaddingPolicy::Drop),
            FixedLengthConfig::new(),
            Some(11),
        );
        (0..5).map(|_| keys(&sampler.sample(8).unwrap())).collect::<Vec<_>>()
    };
    let first = run();
    assert_eq!(first, run());
    assert_ne!(first[0], first[1]);
}

// ============================================================================
// Consecutive
// ============================================================================

#[test]
fn test_consecutive_valid_starts_with_padding() {
    let store = store_with(100, &[10]);
    let sampler = ConsecutiveSampler::new(
        Arc::clone(&store),
        chunker(4, PaddingPolicy::RepeatLast),
        ConsecutiveConfig::new(3),
        Some(1),
    );
    assert_eq!(sampler.valid_starts(10), vec![0]);

    let episode = store.get(EpisodeId(0)).unwrap();
    let group = sampler.sequence_at(&episode, 0).unwrap();
    let offsets: Vec<_> = group.iter().map(Chunk::offset).collect();
    assert_eq!(offsets, vec![0, 4, 8]);
    assert!(group[2].is_padded());
    assert_eq!(group[2].n_valid(), 2);

    assert!(matches!(
        sampler.sequence_at(&episode, 4),
        Err(ReplayError::EpisodeTooShort { episode_len: 10, required: 16 })
    ));
}

#[test]
fn test_consecutive_drop_needs_full_span() {
    let store = store_with(100, &[10]);
    let sampler = ConsecutiveSampler::new(
        Arc::clone(&store),
        chunker(4, PaddingPolicy::Drop),
        ConsecutiveConfig::new(3).with_max_retries(8),
        Some(1),
    );
    assert!(sampler.valid_starts(10).is_empty());
    assert_eq!(sampler.valid_starts(12), vec![0]);

    let episode = store.get(EpisodeId(0)).unwrap();
    assert!(matches!(
        sampler.sequence_at(&episode, 0),
        Err(ReplayError::EpisodeTooShort { episode_len: 10, required: 12 })
    ));
    assert!(matches!(
        sampler.sample(1),
        Err(ReplayError::SampleExhausted { attempts: 8 })
    ));
}

#[test]
fn test_consecutive_randomized_starts() {
    let sampler = ConsecutiveSampler::new(
        store_with(100, &[10]),
        chunker(2, PaddingPolicy::Drop),
        ConsecutiveConfig::new(3).with_randomize(true),
        Some(1),
    );
    assert_eq!(sampler.valid_starts(10), vec![0, 1, 2, 3, 4]);
}

#[test]
fn test_consecutive_groups_stay_together() {
    let store = store_with(200, &[12, 30, 17]);
    let sampler = ConsecutiveSampler::new(
        store,
        chunker(3, PaddingPolicy::Drop),
        ConsecutiveConfig::new(4).with_randomize(true),
        Some(9),
    );

    let flat = sampler.sample(16).unwrap();
    assert_eq!(flat.len(), 64);
    for group in flat.chunks(4) {
        let first = group[0].key();
        for (j, item) in group.iter().enumerate() {
            assert_eq!(item.key().episode, first.episode);
            assert_eq!(item.key().offset, first.offset + 3 * j);
            assert!(!item.chunk.is_padded());
        }
    }

    let groups = sampler.sample_sequences(5).unwrap();
    assert_eq!(groups.len(), 5);
    assert!(groups.iter().all(|g| g.len() == 4));
    assert_eq!(sampler.chunks_per_item(), 4);
}

#[test]
fn test_consecutive_sampled_starts_match_valid_starts() {
    for randomize in [false, true] {
        let sampler = ConsecutiveSampler::new(
            store_with(100, &[23]),
            chunker(3, PaddingPolicy::Drop),
            ConsecutiveConfig::new(2).with_randomize(randomize),
            Some(4),
        );
        let expected: std::collections::BTreeSet<_> =
            sampler.valid_starts(23).into_iter().collect();

        let mut seen = std::collections::BTreeSet::new();
        for group in sampler.sample_sequences(400).unwrap() {
            seen.insert(group[0].chunk.offset());
        }
        assert_eq!(seen, expected, "randomize = {}", randomize);
    }
}

// ============================================================================
// Readiness
// ============================================================================

#[test]
fn test_samplers_not_ready_on_empty_store() {
    for config in [
        SamplerConfig::Fixed(FixedLengthConfig::new()),
        SamplerConfig::Consecutive(ConsecutiveConfig::new(2)),
        SamplerConfig::Prioritized(PrioritizedConfig::new()),
    ] {
        let store = Arc::new(EpisodeStore::new(100));
        let sampler = config.build(store, chunker(4, PaddingPolicy::Drop), Some(0));
        assert_eq!(sampler.kind(), config.kind());
        match sampler.sample(4) {
            Err(e @ ReplayError::NotReady(_)) => assert!(e.is_benign()),
            other => panic!("{} sampler: expected NotReady, got {:?}", config.kind(), other),
        }
    }
}

// ============================================================================
// Prioritized
// ============================================================================

#[test]
fn test_prioritized_indexes_store_contents() {
    let store = store_with(100, &[8, 5]);
    let sampler = PrioritizedSampler::new(
        Arc::clone(&store),
        chunker(4, PaddingPolicy::Drop),
        PrioritizedConfig::new(),
        Some(0),
    );
    // 8 steps give two chunks, 5 steps one.
    assert_eq!(sampler.len(), 3);
    assert_eq!(sampler.max_priority(), 1.0);

    store.insert(make_episode(2, 4)).unwrap();
    assert_eq!(sampler.len(), 4);
    assert!(sampler.priority(&ChunkKey::new(EpisodeId(2), 0)).is_ok());
    assert!(matches!(
        sampler.priority(&ChunkKey::new(EpisodeId(2), 4)),
        Err(ReplayError::UnknownChunkKey(_))
    ));
}

#[test]
fn test_prioritized_prunes_evicted_keys() {
    let store = store_with(12, &[4, 4, 4]);
    let sampler = PrioritizedSampler::new(
        Arc::clone(&store),
        chunker(4, PaddingPolicy::Drop),
        PrioritizedConfig::new(),
        Some(0),
    );
    for id in 3..20 {
        store.insert(make_episode(id, 4)).unwrap();
        assert_eq!(sampler.len(), store.len());
        for item in sampler.sample(8).unwrap() {
            assert!(store.contains(item.key().episode));
        }
    }
    assert!(matches!(
        sampler.priority(&ChunkKey::new(EpisodeId(0), 0)),
        Err(ReplayError::UnknownChunkKey(_))
    ));
}

#[test]
fn test_prioritized_alpha_zero_is_uniform() {
    // Chi-square goodness of fit over 10 equally weighted chunks.
    let n_chunks = 10;
    let store = store_with(100, &vec![4; n_chunks]);
    let sampler = PrioritizedSampler::new(
        store,
        chunker(4, PaddingPolicy::Drop),
        PrioritizedConfig::new().with_alpha(0.0),
        Some(2024),
    );
    // Priorities are ignored at alpha = 0.
    let all: Vec<_> = (0..n_chunks as u64).map(|id| ChunkKey::new(EpisodeId(id), 0)).collect();
    let values: Vec<f32> = (0..n_chunks).map(|i| (i * 10) as f32).collect();
    assert_eq!(sampler.update_priorities(&all, &values), n_chunks);

    let draws = 10_000;
    let mut counts: HashMap<EpisodeId, usize> = HashMap::new();
    for _ in 0..draws {
        let item = sampler.sample(1).unwrap().remove(0);
        assert!((item.weight.unwrap() - 1.0).abs() < 1e-6);
        *counts.entry(item.key().episode).or_default() += 1;
    }

    let expected = draws as f64 / n_chunks as f64;
    let chi2: f64 = (0..n_chunks as u64)
        .map(|id| {
            let observed = counts.get(&EpisodeId(id)).copied().unwrap_or(0) as f64;
            (observed - expected).powi(2) / expected
        })
        .sum();
    // 9 degrees of freedom, p = 0.001
    assert!(chi2 < 27.88, "chi-square {} too large", chi2);
}

#[test]
fn test_update_priorities_shifts_sampling() {
    let store = store_with(100, &[4, 4, 4, 4]);
    let sampler = PrioritizedSampler::new(
        store,
        chunker(4, PaddingPolicy::Drop),
        PrioritizedConfig::new().with_alpha(1.0),
        Some(5),
    );
    let hot = ChunkKey::new(EpisodeId(0), 0);
    assert_eq!(sampler.update_priorities(&[hot], &[9.0]), 1);
    assert!((sampler.max_priority() - 9.0).abs() < 1e-3);

    let draws = 4000;
    let hits = (0..draws)
        .filter(|_| sampler.sample(1).unwrap()[0].key() == hot)
        .count();
    let frac = hits as f64 / draws as f64;
    assert!((frac - 0.75).abs() < 0.05, "hot chunk fraction {}", frac);
}

#[test]
fn test_prioritized_weights_normalized() {
    let store = store_with(200, &[8, 8, 8, 8]);
    let sampler = PrioritizedSampler::new(
        store,
        chunker(4, PaddingPolicy::Drop),
        PrioritizedConfig::new().with_beta(0.5),
        Some(7),
    );
    let sampled = sampler.sample(32).unwrap();
    let priorities: Vec<f32> = (0..sampled.len()).map(|i| (i % 5) as f32 + 0.1).collect();
    sampler.update_priorities(&keys(&sampled), &priorities);

    let batch = sampler.sample(32).unwrap();
    let weights: Vec<f32> = batch.iter().map(|s| s.weight.unwrap()).collect();
    assert!(weights.iter().all(|&w| w > 0.0 && w <= 1.0));
    let max = weights.iter().cloned().fold(0.0_f32, f32::max);
    assert!((max - 1.0).abs() < 1e-6);
}

#[test]
fn test_prioritized_weights_match_formula() {
    // Stored priorities 1 and 3 give P = 0.25 and 0.75; relative to the
    // rarer chunk the common one weighs (0.75 / 0.25)^-beta.
    for (beta, expected) in [(1.0_f32, 1.0_f32 / 3.0), (0.5, 3.0_f32.sqrt().recip())] {
        let sampler = PrioritizedSampler::new(
            store_with(100, &[8]),
            chunker(4, PaddingPolicy::Drop),
            PrioritizedConfig::new()
                .with_alpha(1.0)
                .with_epsilon(0.0)
                .with_beta(beta),
            Some(3),
        );
        let rare = ChunkKey::new(EpisodeId(0), 0);
        let common = ChunkKey::new(EpisodeId(0), 4);
        assert_eq!(sampler.update_priorities(&[rare, common], &[1.0, 3.0]), 2);

        let batch = sampler.sample(64).unwrap();
        assert!(batch.iter().any(|s| s.key() == rare));
        assert!(batch.iter().any(|s| s.key() == common));
        for item in &batch {
            let weight = item.weight.unwrap();
            let want = if item.key() == rare { 1.0 } else { expected };
            assert!(
                (weight - want).abs() < 1e-5,
                "beta {}: weight {} for {:?}, want {}",
                beta,
                weight,
                item.key(),
                want
            );
        }
    }
}

#[test]
fn test_update_priorities_drops_bad_input() {
    let store = store_with(100, &[4, 4]);
    let sampler = PrioritizedSampler::new(
        Arc::clone(&store),
        chunker(4, PaddingPolicy::Drop),
        PrioritizedConfig::new(),
        Some(0),
    );
    let keys = [
        ChunkKey::new(EpisodeId(0), 0),
        ChunkKey::new(EpisodeId(99), 0),
        ChunkKey::new(EpisodeId(1), 0),
        ChunkKey::new(EpisodeId(1), 0),
    ];
    let applied = sampler.update_priorities(&keys, &[2.0, 5.0, f32::NAN, f32::INFINITY]);
    assert_eq!(applied, 1);

    let stats = store.metrics().snapshot(0, 0, 0);
    assert_eq!(stats.priority_updates, 1);
    assert_eq!(stats.priority_updates_dropped, 3);
    assert!((sampler.max_priority() - 2.0).abs() < 1e-3);
}

#[test]
fn test_new_chunks_enter_at_max_priority() {
    let store = store_with(100, &[4]);
    let sampler = PrioritizedSampler::new(
        Arc::clone(&store),
        chunker(4, PaddingPolicy::Drop),
        PrioritizedConfig::new().with_alpha(1.0).with_epsilon(0.0),
        Some(0),
    );
    sampler.update_priorities(&[ChunkKey::new(EpisodeId(0), 0)], &[3.0]);
    store.insert(make_episode(1, 4)).unwrap();
    let p = sampler.priority(&ChunkKey::new(EpisodeId(1), 0)).unwrap();
    assert!((p - 3.0).abs() < 1e-5);
}

#[test]
fn test_beta_annealing() {
    let sampler = PrioritizedSampler::new(
        store_with(100, &[4]),
        chunker(4, PaddingPolicy::Drop),
        PrioritizedConfig::new().with_beta(0.4),
        Some(0),
    );
    assert_eq!(sampler.beta(), 0.4);

    sampler.anneal_beta(0.5);
    assert!((sampler.beta() - 0.7).abs() < 0.01); // 0.4 + 0.6 * 0.5 = 0.7

    sampler.anneal_beta(2.0);
    assert!((sampler.beta() - 1.0).abs() < 0.01);
}

#[test]
fn test_fixed_length_ignores_priority_feedback() {
    let sampler = SamplerConfig::default().build(
        store_with(100, &[4]),
        chunker(4, PaddingPolicy::Drop),
        Some(0),
    );
    assert_eq!(
        sampler.update_priorities(&[ChunkKey::new(EpisodeId(0), 0)], &[1.0]),
        0
    );
}

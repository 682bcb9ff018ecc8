use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tbsync::summary::EvictionPolicy;
use tbsync::{
    ChannelLimits, ConfigurationError, RetentionBuffer, SummaryKind, SummaryPayload,
    SummaryRecord,
};

fn seeded(limits: ChannelLimits) -> RetentionBuffer {
    RetentionBuffer::with_rng(limits, Box::new(ChaCha8Rng::seed_from_u64(7))).unwrap()
}

fn retained_steps(buffer: &RetentionBuffer, tag: &str) -> Vec<i64> {
    buffer
        .sequence(tag)
        .unwrap()
        .map(|record| record.step.unwrap())
        .collect()
}

#[test]
fn numeric_sampling_keeps_endpoints() {
    let mut buffer = seeded(ChannelLimits::new(10, 1, 1));
    for step in 0..1_000 {
        buffer.insert(SummaryRecord::numeric("loss", step as f64).with_step(step));
    }
    let steps = retained_steps(&buffer, "loss");
    assert_eq!(steps.len(), 10);
    assert_eq!(steps.first(), Some(&0));
    assert_eq!(steps.last(), Some(&999));
    assert!(steps.windows(2).all(|pair| pair[0] < pair[1]));
    assert_eq!(buffer.evicted_total(), 990);
}

#[test]
fn numeric_capacity_one_keeps_latest() {
    let mut buffer = seeded(ChannelLimits::new(1, 1, 1));
    for step in 0..5 {
        buffer.insert(SummaryRecord::numeric("lr", 0.1).with_step(step));
    }
    assert_eq!(retained_steps(&buffer, "lr"), vec![4]);
}

#[test]
fn numeric_capacity_two_keeps_first_and_last() {
    let mut buffer = seeded(ChannelLimits::new(2, 1, 1));
    for step in 0..20 {
        buffer.insert(SummaryRecord::numeric("acc", 0.5).with_step(step));
    }
    assert_eq!(retained_steps(&buffer, "acc"), vec![0, 19]);
}

#[test]
fn image_and_text_slide_over_recent_values() {
    let mut buffer = seeded(ChannelLimits::new(10, 3, 2));
    for step in 0..6 {
        buffer.insert(SummaryRecord::image("samples", vec![step as u8]).with_step(step));
        buffer.insert(SummaryRecord::text("notes", [format!("note {step}")]).with_step(step));
    }
    assert_eq!(retained_steps(&buffer, "samples"), vec![3, 4, 5]);
    let notes: Vec<_> = buffer
        .sequence("notes")
        .unwrap()
        .map(|record| record.payload.clone())
        .collect();
    assert_eq!(
        notes,
        vec![
            SummaryPayload::Text(vec!["note 4".into()]),
            SummaryPayload::Text(vec!["note 5".into()]),
        ]
    );
}

#[test]
fn insert_returns_the_evicted_record() {
    let mut buffer = seeded(ChannelLimits::new(10, 1, 10));
    assert!(buffer
        .insert(SummaryRecord::image("img", vec![1]).with_step(1))
        .is_none());
    let evicted = buffer
        .insert(SummaryRecord::image("img", vec![2]).with_step(2))
        .unwrap();
    assert_eq!(evicted.step, Some(1));
}

#[test]
fn zero_capacity_discards_without_creating_sequences() {
    let mut buffer = seeded(ChannelLimits::new(0, 5, 5));
    buffer.insert(SummaryRecord::numeric("loss", 1.0));
    buffer.insert(SummaryRecord::numeric("loss", 2.0));
    assert!(buffer.sequence("loss").is_none());
    assert!(buffer.tags().is_empty());
    assert!(buffer.is_empty());
    assert_eq!(buffer.dropped_total(), 2);
    assert_eq!(buffer.evicted_total(), 0);
}

#[test]
fn negative_capacity_is_rejected() {
    let err = RetentionBuffer::new(ChannelLimits::new(10, -1, 10)).err().unwrap();
    assert_eq!(
        err,
        ConfigurationError::NegativeCapacity {
            kind: SummaryKind::Image,
            value: -1,
        }
    );
}

#[test]
fn flush_follows_first_seen_tag_order() {
    let mut buffer = seeded(ChannelLimits::default());
    buffer.insert(SummaryRecord::numeric("b", 1.0).with_step(0));
    buffer.insert(SummaryRecord::numeric("a", 2.0).with_step(0));
    buffer.insert(SummaryRecord::numeric("b", 3.0).with_step(1));
    buffer.insert(SummaryRecord::text("c", ["x"]).with_step(0));
    assert_eq!(buffer.tags(), ["b", "a", "c"]);
    assert_eq!(buffer.len(), 4);
    assert_eq!(buffer.len_of("b"), 2);

    let flushed: Vec<_> = buffer
        .flush_in_order()
        .map(|(tag, record)| (tag, record.step.unwrap()))
        .collect();
    assert_eq!(
        flushed,
        vec![
            ("b".to_string(), 0),
            ("b".to_string(), 1),
            ("a".to_string(), 0),
            ("c".to_string(), 0),
        ]
    );
}

#[test]
fn spread_sample_never_picks_endpoints() {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    for _ in 0..500 {
        let victim = EvictionPolicy::SpreadSample.victim(6, &mut rng);
        assert!((1..5).contains(&victim));
    }
    assert_eq!(EvictionPolicy::SpreadSample.victim(2, &mut rng), 0);
    assert_eq!(EvictionPolicy::SlidingWindow.victim(6, &mut rng), 0);
}

#[test]
fn limits_fill_defaults_from_partial_json() {
    let limits: ChannelLimits = serde_json::from_str(r#"{"image": 5}"#).unwrap();
    assert_eq!(limits.image, 5);
    assert_eq!(limits.numeric, ChannelLimits::default().numeric);
    assert_eq!(limits.text, ChannelLimits::default().text);
}

#[test]
fn thousand_scalars_sample_down_to_one_hundred() {
    let mut buffer = seeded(ChannelLimits::new(100, 1, 1));
    for step in 0..1_000 {
        buffer.insert(SummaryRecord::numeric("loss", step as f64).with_step(step));
    }
    let steps = retained_steps(&buffer, "loss");
    assert_eq!(steps.len(), 100);
    assert_eq!(steps.first(), Some(&0));
    assert_eq!(steps.last(), Some(&999));
    assert!(steps.windows(2).all(|pair| pair[0] < pair[1]));
}

#[test]
fn hundred_images_keep_the_last_ten() {
    let mut buffer = seeded(ChannelLimits::new(1, 10, 1));
    for step in 0..100 {
        buffer.insert(SummaryRecord::image("samples", vec![step as u8]).with_step(step));
    }
    assert_eq!(retained_steps(&buffer, "samples"), (90..100).collect::<Vec<_>>());
}

#[test]
fn sequences_never_exceed_capacity_across_seeds() {
    for seed in 0..8 {
        let limits = ChannelLimits::new(25, 10, 4);
        let mut buffer =
            RetentionBuffer::with_rng(limits, Box::new(ChaCha8Rng::seed_from_u64(seed))).unwrap();
        for step in 0..500 {
            buffer.insert(SummaryRecord::numeric("loss", step as f64).with_step(step));
            buffer.insert(SummaryRecord::image("samples", vec![step as u8]).with_step(step));
            buffer.insert(SummaryRecord::text("notes", [format!("{step}")]).with_step(step));
            assert!(buffer.len_of("loss") <= 25, "seed {seed} step {step}");
            assert!(buffer.len_of("samples") <= 10, "seed {seed} step {step}");
            assert!(buffer.len_of("notes") <= 4, "seed {seed} step {step}");
        }
        let steps = retained_steps(&buffer, "loss");
        assert_eq!(steps.len(), 25);
        assert_eq!((steps[0], steps[24]), (0, 499));
    }
}

use std::collections::HashMap;
use std::rc::Rc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;

use af_core::clock::ManualClock;
use af_core::registry::{TabHandle, TabRegistry, TabResolver};
use af_core::types::{FrameId, RuleGroup, TabId};
use af_core::FilterContext;

struct FramePerTab;

impl TabResolver for FramePerTab {
    fn tab_for_frame(&self, frame: FrameId) -> Option<TabHandle> {
        Some(TabHandle {
            tab_id: TabId(frame.0 % 16),
            off_the_record: false,
        })
    }
}

fn build_registry() -> TabRegistry {
    let clock = Rc::new(ManualClock::new(1_700_000_000));
    let mut registry = TabRegistry::new(FilterContext::with_clock(clock), Rc::new(FramePerTab));

    let trackers: HashMap<String, serde_json::Value> = (0..500)
        .map(|i| (format!("tracker{i}.net"), json!({ "id": i })))
        .collect();
    registry.on_tracker_infos_updated(RuleGroup::TrackingRules, 1, trackers);
    registry
}

fn bench_on_url_blocked(c: &mut Criterion) {
    let urls: Vec<String> = (0..256)
        .map(|i| format!("https://cdn{}.tracker{}.net/pixel.gif?id={i}", i % 7, i % 600))
        .collect();

    c.bench_function("on_url_blocked/tracking", |b| {
        let mut registry = build_registry();
        let mut i = 0u64;
        b.iter(|| {
            let url = &urls[(i as usize) % urls.len()];
            registry.on_url_blocked(
                RuleGroup::TrackingRules,
                "https://news.example.com/article",
                black_box(url),
                FrameId(i),
            );
            i += 1;
        })
    });

    c.bench_function("on_url_blocked/ad_blocking", |b| {
        let mut registry = build_registry();
        let mut i = 0u64;
        b.iter(|| {
            let url = &urls[(i as usize) % urls.len()];
            registry.on_url_blocked(
                RuleGroup::AdBlockingRules,
                "https://news.example.com/article",
                black_box(url),
                FrameId(i),
            );
            i += 1;
        })
    });
}

criterion_group!(benches, bench_on_url_blocked);
criterion_main!(benches);

// Copyright 2025 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use std::rc::Rc;

use simlin_ltm::LinkPolarity::{Negative, Positive, Unknown};
use simlin_ltm::testutils::{x_aux, x_const, x_flow, x_model, x_stock};
use simlin_ltm::{
    DiscoveryMode, Equation, LoopPolarity, LtmResults, Method, Model, Options, Results, Specs,
    Variable, Vm,
};

fn run(model: Rc<Model>, specs: Specs, options: Options) -> (Results, LtmResults) {
    let mut vm = Vm::new(model, specs).unwrap().with_ltm(options).unwrap();
    vm.run_to_end().unwrap();
    let (results, ltm) = vm.into_results();
    (results, ltm.unwrap())
}

// ── Bass diffusion ──────────────────────────────────────────────────────

fn bass_model() -> Rc<Model> {
    x_model(vec![
        x_stock("potential_adopters", 99_900.0, &[], &["adopting"]),
        x_stock("adopters", 100.0, &["adopting"], &[]),
        x_const("contact_rate", 100.0),
        x_const("adoption_fraction", 0.015),
        x_const("total_population", 100_000.0),
        x_flow(
            "adopting",
            &[
                ("contact_rate", Positive),
                ("adoption_fraction", Positive),
                ("potential_adopters", Positive),
                ("adopters", Positive),
                ("total_population", Negative),
            ],
            |v| v[0] * v[1] * v[2] * v[3] / v[4],
        ),
    ])
}

#[test]
fn bass_dominance_shifts_at_the_inflection() {
    let specs = Specs::new(0.0, 12.0, 0.25, Method::Euler).unwrap();
    let (results, ltm) = run(bass_model(), specs, Options::default());
    assert!(ltm.exhaustive);
    assert_eq!(2, ltm.loops.len());

    // R1 is word of mouth (adopters drive adopting), B1 is saturation
    let r1 = ltm.loop_by_id("R1").unwrap();
    let b1 = ltm.loop_by_id("B1").unwrap();
    assert!(r1.path.contains(&"adopters".to_string()));
    assert!(b1.path.contains(&"potential_adopters".to_string()));
    assert_eq!(LoopPolarity::Reinforcing, r1.structural_polarity);
    assert_eq!(LoopPolarity::Reinforcing, r1.runtime_polarity);
    assert_eq!(LoopPolarity::Balancing, b1.structural_polarity);
    assert_eq!(LoopPolarity::Balancing, b1.runtime_polarity);

    let last = ltm.step_count - 1;

    // growth dominated early, saturation dominated late, with a monotone
    // handoff in between
    assert!(r1.relative_scores[2] > 0.5);
    assert!(r1.relative_scores[last] < 0.5);
    for step in 2..last {
        assert!(
            r1.relative_scores[step + 1] <= r1.relative_scores[step] + 1e-12,
            "word-of-mouth share rose at step {step}"
        );
        // the two loops split the whole partition between them
        let total = r1.relative_scores[step].abs() + b1.relative_scores[step].abs();
        assert!((total - 1.0).abs() < 1e-9, "step {step}: total {total}");
        assert!(b1.relative_scores[step] < 0.0);
    }

    // the handoff happens where adopters crosses half the population
    let crossing = (2..=last)
        .find(|&step| r1.relative_scores[step] < 0.5)
        .unwrap();
    let adopters = results.get(crossing - 1, "adopters").unwrap();
    assert!(
        (adopters - 50_000.0).abs() < 10_000.0,
        "dominance shifted at adopters = {adopters}"
    );

    assert_eq!(vec!["R1".to_string()], ltm.dominant_at(0, 2).to_vec());
    assert_eq!(vec!["B1".to_string()], ltm.dominant_at(0, last).to_vec());
}

// ── Goal seeking ────────────────────────────────────────────────────────

#[test]
fn goal_seeking_loop_holds_full_share() {
    let model = x_model(vec![
        x_stock("level", 0.0, &["filling"], &[]),
        x_const("target", 10.0),
        x_const("adjustment_time", 5.0),
        x_flow(
            "filling",
            &[
                ("target", Positive),
                ("level", Negative),
                ("adjustment_time", Negative),
            ],
            |v| (v[0] - v[1]) / v[2],
        ),
    ]);
    let specs = Specs::new(0.0, 20.0, 1.0, Method::Euler).unwrap();
    let (results, ltm) = run(model, specs, Options::default());

    assert_eq!(1, ltm.loops.len());
    let b1 = ltm.loop_by_id("B1").unwrap();
    assert_eq!(LoopPolarity::Balancing, b1.structural_polarity);
    assert_eq!(LoopPolarity::Balancing, b1.runtime_polarity);

    for step in 2..ltm.step_count {
        assert!(
            (b1.relative_scores[step] + 1.0).abs() < 1e-9,
            "step {step}: {}",
            b1.relative_scores[step]
        );
        assert_eq!(vec!["B1".to_string()], ltm.dominant_at(0, step).to_vec());
    }

    // the level is still approaching its target at the end of the run
    let last = ltm.step_count - 1;
    let level = results.get(last, "level").unwrap();
    assert!(level > 9.0 && level < 10.0);
}

// ── Aggregation invariance ──────────────────────────────────────────────

fn stepped_in(v: &[f64]) -> f64 {
    if v[0] < 2.0 { 5.0 } else { 10.0 }
}

fn stepped_out(v: &[f64]) -> f64 {
    if v[0] < 2.0 { 4.0 } else { 5.0 }
}

#[test]
fn disaggregated_flows_score_like_their_net() {
    // the same tank expressed with two raw flows and with a single net flow
    let raw = x_model(vec![
        x_stock("tank", 100.0, &["pour"], &["drain"]),
        x_flow("pour", &[("time", Unknown)], stepped_in),
        x_flow("drain", &[("time", Unknown)], stepped_out),
    ]);
    let net = x_model(vec![
        x_stock("tank", 100.0, &["net_flow"], &[]),
        x_aux("pour", &[("time", Unknown)], stepped_in),
        x_aux("drain", &[("time", Unknown)], stepped_out),
        x_flow(
            "net_flow",
            &[("pour", Positive), ("drain", Negative)],
            |v| v[0] - v[1],
        ),
    ]);

    let specs = Specs::new(0.0, 4.0, 1.0, Method::Euler).unwrap();
    let (_, ltm_raw) = run(raw, specs.clone(), Options::default());
    let (_, ltm_net) = run(net, specs, Options::default());

    let link = |ltm: &LtmResults, from: &str, to: &str| -> Vec<f64> {
        ltm.links
            .iter()
            .find(|l| l.from == from && l.to == to)
            .unwrap()
            .scores
            .clone()
    };

    // the score a flow earns on the stock directly must equal the score it
    // earns through the net-flow chain
    let pour_direct = link(&ltm_raw, "pour", "tank");
    let drain_direct = link(&ltm_raw, "drain", "tank");
    let pour_chain: Vec<f64> = link(&ltm_net, "pour", "net_flow")
        .iter()
        .zip(link(&ltm_net, "net_flow", "tank"))
        .map(|(a, b)| a * b)
        .collect();
    let drain_chain: Vec<f64> = link(&ltm_net, "drain", "net_flow")
        .iter()
        .zip(link(&ltm_net, "net_flow", "tank"))
        .map(|(a, b)| a * b)
        .collect();

    for step in 0..pour_direct.len() {
        assert!(
            (pour_direct[step] - pour_chain[step]).abs() < 1e-12,
            "pour at step {step}: {} vs {}",
            pour_direct[step],
            pour_chain[step]
        );
        assert!(
            (drain_direct[step] - drain_chain[step]).abs() < 1e-12,
            "drain at step {step}: {} vs {}",
            drain_direct[step],
            drain_chain[step]
        );
    }
}

#[test]
fn aggregation_invariance_holds_for_loops() {
    // drain responds to the tank level, closing a balancing loop; the loop
    // score must not depend on whether flows are disaggregated
    let raw = x_model(vec![
        x_stock("tank", 100.0, &["pour"], &["drain"]),
        x_flow("pour", &[("time", Unknown)], stepped_in),
        x_flow("drain", &[("tank", Positive)], |v| v[0] * 0.04),
    ]);
    let net = x_model(vec![
        x_stock("tank", 100.0, &["net_flow"], &[]),
        x_aux("pour", &[("time", Unknown)], stepped_in),
        x_aux("drain", &[("tank", Positive)], |v| v[0] * 0.04),
        x_flow(
            "net_flow",
            &[("pour", Positive), ("drain", Negative)],
            |v| v[0] - v[1],
        ),
    ]);

    let specs = Specs::new(0.0, 10.0, 1.0, Method::Euler).unwrap();
    let (_, ltm_raw) = run(raw, specs.clone(), Options::default());
    let (_, ltm_net) = run(net, specs, Options::default());

    let loop_raw = ltm_raw.loop_by_id("B1").unwrap();
    let loop_net = ltm_net.loop_by_id("B1").unwrap();
    assert_eq!(loop_raw.raw_scores.len(), loop_net.raw_scores.len());
    for step in 2..loop_raw.raw_scores.len() {
        assert!(
            (loop_raw.raw_scores[step] - loop_net.raw_scores[step]).abs() < 1e-9,
            "step {step}: {} vs {}",
            loop_raw.raw_scores[step],
            loop_net.raw_scores[step]
        );
    }
}

// ── Three-party arms race ───────────────────────────────────────────────

fn arms_race_model() -> Rc<Model> {
    let adjust = |v: &[f64]| (v[0] - v[1]) / v[2];
    x_model(vec![
        x_stock("a", 50.0, &["adjust_a"], &[]),
        x_stock("b", 100.0, &["adjust_b"], &[]),
        x_stock("c", 150.0, &["adjust_c"], &[]),
        x_const("period", 2.0),
        x_aux(
            "target_a",
            &[("b", Positive), ("c", Positive)],
            |v| v[0] + 0.9 * v[1],
        ),
        x_aux(
            "target_b",
            &[("a", Positive), ("c", Positive)],
            |v| v[0] + 1.1 * v[1],
        ),
        x_aux(
            "target_c",
            &[("a", Positive), ("b", Positive)],
            |v| 1.1 * v[0] + 0.9 * v[1],
        ),
        x_flow(
            "adjust_a",
            &[("target_a", Positive), ("a", Negative), ("period", Negative)],
            adjust,
        ),
        x_flow(
            "adjust_b",
            &[("target_b", Positive), ("b", Negative), ("period", Negative)],
            adjust,
        ),
        x_flow(
            "adjust_c",
            &[("target_c", Positive), ("c", Negative), ("period", Negative)],
            adjust,
        ),
    ])
}

#[test]
fn arms_race_loop_census() {
    let specs = Specs::new(0.0, 30.0, 0.25, Method::Euler).unwrap();
    let options = Options {
        // keep every loop reported, however small its share
        contribution_cutoff: 0.0,
        ..Options::default()
    };
    let (results, ltm) = run(arms_race_model(), specs, options);

    assert!(ltm.exhaustive);
    assert_eq!(1, ltm.partitions.len());
    assert_eq!(8, ltm.loops.len());

    let balancing = ltm
        .loops
        .iter()
        .filter(|l| l.structural_polarity == LoopPolarity::Balancing)
        .count();
    let reinforcing = ltm
        .loops
        .iter()
        .filter(|l| l.structural_polarity == LoopPolarity::Reinforcing)
        .count();
    assert_eq!(3, balancing, "one self-adjustment loop per nation");
    assert_eq!(5, reinforcing, "three pairwise plus two three-party loops");

    let three_party: Vec<_> = ltm.loops.iter().filter(|l| l.stocks.len() == 3).collect();
    assert_eq!(2, three_party.len());
    for l in &three_party {
        assert_eq!(LoopPolarity::Reinforcing, l.structural_polarity);
    }

    // by the end of the run the race has locked into exponential growth:
    // every reinforcing loop pushes, every self-adjustment loop drags
    let last = ltm.step_count - 1;
    for l in &ltm.loops {
        match l.structural_polarity {
            LoopPolarity::Reinforcing => assert!(
                l.raw_scores[last] > 0.0,
                "{} should reinforce at the end, scored {}",
                l.id,
                l.raw_scores[last]
            ),
            LoopPolarity::Balancing => assert!(
                l.raw_scores[last] < 0.0,
                "{} should balance at the end, scored {}",
                l.id,
                l.raw_scores[last]
            ),
            LoopPolarity::Undetermined => panic!("unexpected undetermined loop {}", l.id),
        }
    }

    // shares stay normalized and somebody dominates
    let total: f64 = ltm
        .loops
        .iter()
        .map(|l| l.relative_scores[last].abs())
        .sum();
    assert!((total - 1.0).abs() < 1e-9);
    assert!(!ltm.dominant_at(0, last).is_empty());

    // and the arms race is in fact racing
    let a_start = results.get(0, "a").unwrap();
    let a_end = results.get(last, "a").unwrap();
    assert!(a_end > 100.0 * a_start);
}

// ── Equilibrium ─────────────────────────────────────────────────────────

#[test]
fn equilibrium_scores_nothing() {
    // inflow exactly balances the level-proportional outflow
    let model = x_model(vec![
        x_stock("reservoir", 10.0, &["refill"], &["draw"]),
        x_flow("refill", &[], |_| 2.0),
        x_flow("draw", &[("reservoir", Positive)], |v| v[0] * 0.2),
    ]);
    let specs = Specs::new(0.0, 10.0, 1.0, Method::Euler).unwrap();
    let options = Options {
        contribution_cutoff: 0.0,
        ..Options::default()
    };
    let (results, ltm) = run(model, specs, options);

    for step in 0..ltm.step_count {
        assert_eq!(Some(10.0), results.get(step, "reservoir"));
    }
    for link in &ltm.links {
        assert!(link.scores.iter().all(|&s| s == 0.0), "{}", link.to);
    }
    assert_eq!(1, ltm.loops.len());
    let l = &ltm.loops[0];
    assert!(l.raw_scores.iter().all(|&s| s == 0.0));
    assert!(l.relative_scores.iter().all(|&s| s == 0.0));
    assert_eq!(LoopPolarity::Undetermined, l.runtime_polarity);
    for step in 0..ltm.step_count {
        assert!(ltm.dominant_at(0, step).is_empty());
        assert_eq!(0.0, ltm.partitions[0].denominators[step]);
    }
}

#[test]
fn clamped_stock_scores_its_actual_change() {
    // a growing draw empties the tank; after the floor engages, the
    // flow-to-stock score reflects the clamped trajectory the integrator
    // produced, and goes quiet once the tank sits on the bottom
    let model = x_model(vec![
        Variable::Stock {
            ident: "tank".to_string(),
            init: Equation::constant(10.0),
            inflows: vec![],
            outflows: vec!["draw".to_string()],
            non_negative: true,
        },
        x_flow("draw", &[("time", Unknown)], |v| 4.0 + 2.0 * v[0]),
    ]);
    let specs = Specs::new(0.0, 3.0, 1.0, Method::Euler).unwrap();
    let (results, ltm) = run(model, specs, Options::default());

    // trajectory: 10, 6, 0, 0 (clamped at the last advance)
    assert_eq!(Some(0.0), results.get(2, "tank"));
    assert_eq!(Some(0.0), results.get(3, "tank"));

    let link = ltm
        .links
        .iter()
        .find(|l| l.from == "draw" && l.to == "tank")
        .unwrap();
    assert_eq!(0.0, link.scores[1]);
    // at the step the tank bottoms out, D = 0 - (-6)
    assert!((link.scores[2] + 2.0 / 6.0).abs() < 1e-12);
    // flat on the bottom: both changes are 0, the score is undefined
    assert_eq!(0.0, link.scores[3]);
}

// ── Per-step discovery cross-validation ─────────────────────────────────

#[test]
fn per_step_discovery_matches_exhaustive_on_small_models() {
    let specs = Specs::new(0.0, 12.0, 0.25, Method::Euler).unwrap();
    let (_, exhaustive) = run(bass_model(), specs.clone(), Options::default());

    let options = Options {
        mode: DiscoveryMode::PerStep,
        ..Options::default()
    };
    let (_, discovered) = run(bass_model(), specs, options);
    assert!(!discovered.exhaustive);

    assert_eq!(exhaustive.loops.len(), discovered.loops.len());
    for expected in &exhaustive.loops {
        let mut expected_path = expected.path.clone();
        expected_path.sort();
        let found = discovered
            .loops
            .iter()
            .find(|l| {
                let mut path = l.path.clone();
                path.sort();
                path == expected_path
            })
            .unwrap_or_else(|| panic!("loop {} not discovered", expected.id));

        assert_eq!(expected.structural_polarity, found.structural_polarity);
        for step in 0..exhaustive.step_count {
            assert!(
                (expected.relative_scores[step] - found.relative_scores[step]).abs() < 1e-12,
                "loop {} diverges at step {step}",
                expected.id
            );
        }
    }
}

#[test]
fn sampled_discovery_still_finds_persistent_loops() {
    let specs = Specs::new(0.0, 12.0, 0.25, Method::Euler).unwrap();
    let options = Options {
        mode: DiscoveryMode::PerStep,
        discovery_sample: 8,
        ..Options::default()
    };
    let (_, ltm) = run(bass_model(), specs, options);
    assert_eq!(2, ltm.loops.len());
    // backfill means the series still spans the whole run
    for l in &ltm.loops {
        assert_eq!(ltm.step_count, l.raw_scores.len());
    }
}

// ── Evaluation failures ─────────────────────────────────────────────────

#[test]
fn failures_surface_and_leave_normalization_finite() {
    // disturbance blows up at t = 3 and poisons the goal-seeking flow
    let model = x_model(vec![
        x_stock("s", 0.0, &["f"], &[]),
        x_aux("disturbance", &[("time", Unknown)], |v| 1.0 / (v[0] - 3.0)),
        x_flow(
            "f",
            &[("s", Negative), ("disturbance", Unknown)],
            |v| (10.0 - v[0]) / 5.0 + 0.0 * v[1],
        ),
    ]);
    let specs = Specs::new(0.0, 8.0, 1.0, Method::Euler).unwrap();
    let (_, ltm) = run(model, specs, Options::default());

    assert!(
        ltm.failures
            .iter()
            .any(|fail| fail.ident == "disturbance" && fail.step == 3),
        "expected a failure on disturbance at step 3, got {:?}",
        ltm.failures
    );
    assert!(ltm.failures.iter().any(|fail| fail.ident == "f"));

    let b1 = ltm.loop_by_id("B1").unwrap();
    // sound before the singularity, NaN raw but zero relative after it
    assert!((b1.relative_scores[2] + 1.0).abs() < 1e-9);
    assert!(b1.raw_scores[4].is_nan());
    assert_eq!(0.0, b1.relative_scores[4]);
    for &rel in &b1.relative_scores {
        assert!((-1.0..=1.0).contains(&rel));
    }
}

use rand::{rngs::StdRng, Rng, SeedableRng};

use super::utils::{Record, SimNetwork, Tally};

const REPLICAS: usize = 4;
const STEPS: usize = 600;

/// Random interleaving of local edits, deliveries and link drops.
fn run(seed: u64, max_stack_size: usize, with_drops: bool) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut network = SimNetwork::new(Tally::default(), max_stack_size, REPLICAS);
    let mut next_tag = 0u32;

    for _ in 0..STEPS {
        let index = rng.gen_range(0..REPLICAS);

        match rng.gen_range(0..100) {
            0..=24 => {
                next_tag += 1;
                network.replicas[index].dispatch(Record(next_tag)).unwrap();
            }
            25..=31 => {
                network.replicas[index].undo().unwrap();
            }
            32..=37 => {
                let replica = &network.replicas[index];
                let applied: Vec<_> = replica.applied_actions().map(|(id, _)| id).collect();
                if !applied.is_empty() {
                    let id = applied[rng.gen_range(0..applied.len())];
                    network.replicas[index].undo_action(id).unwrap();
                }
            }
            38..=41 => {
                network.replicas[index].redo().unwrap();
            }
            42..=43 if with_drops => {
                if network.is_connected(index) {
                    network.disconnect(index);
                } else {
                    network.connect(index);
                }
            }
            _ => {
                network.step(&mut rng);
            }
        }
    }

    for index in 0..REPLICAS {
        if !network.is_connected(index) {
            network.connect(index);
        }
    }
    network.settle();
    network.assert_converged();

    // Ids are unique, so each sequenced action shows up once
    let state = network.sequencer.current_state().unwrap();
    let stacked = network.sequencer.stack_len();
    assert!(state.log.len() >= stacked);
}

#[test]
fn replicas_converge_without_folding() {
    for seed in 0..8 {
        run(seed, 10_000, false);
    }
}

#[test]
fn replicas_converge_across_link_drops() {
    for seed in 100..108 {
        run(seed, 10_000, true);
    }
}

#[test]
fn replicas_converge_with_a_small_stack() {
    for seed in 200..208 {
        run(seed, 3, false);
    }
}

#[test]
fn replicas_converge_with_a_small_stack_across_link_drops() {
    for seed in 300..308 {
        run(seed, 3, true);
    }
}

#[test]
fn identical_schedules_are_reproducible() {
    let order = |seed| {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut network = SimNetwork::new(Tally::default(), 10_000, 2);
        for tag in 0..20 {
            let index = rng.gen_range(0..2);
            network.replicas[index].dispatch(Record(tag)).unwrap();
            while rng.gen_bool(0.5) && network.step(&mut rng) {}
        }
        network.settle();
        network.sequencer.current_state().unwrap()
    };

    assert_eq!(order(7), order(7));
}

//! One self-play episode: drive the environment with the agent (and
//! optionally a scripted opponent for one side), collect transitions in
//! move order, and settle terminal rewards for both sides.
//!
//! Rewards inside `ChessEnv` are always for the side that just moved, so
//! when an episode ends the *other* side's last transition is still open;
//! it is patched here with its own terminal reward (the self-play symmetry:
//! one side's win is the negation case of the other's pending move).

use std::time::Instant;

use rand_chacha::ChaCha8Rng;
use tracing::warn;

use crate::dqn::DqnAgent;
use crate::encoding::{move_to_action_index, ActionMask};
use crate::env::{ChessEnv, EnvOptions, EpisodeEnd};
use crate::piece::Color;
use crate::replay::Experience;
use crate::selfplay::opponent::OpponentKind;

/// A finished episode, ready for the replay buffer.
pub struct EpisodeRecord {
    pub experiences: Vec<Experience>,
    pub plies: usize,
    pub end: Option<EpisodeEnd>,
    /// Sum of recorded rewards; a per-game training signal for the cycle
    /// summary.
    pub reward_sum: f64,
}

/// How the episode terminated from the scheduler's point of view.
pub enum EpisodeOutcome {
    Finished(EpisodeRecord),
    /// Hit the cycle deadline; partial experiences are dropped to avoid
    /// biased episode tails.
    DeadlineAborted,
    /// The environment rejected a step; partial experiences are dropped.
    Failed,
}

fn color_index(color: Color) -> usize {
    match color {
        Color::White => 0,
        Color::Black => 1,
    }
}

/// Terminal reward for the side that did not make the final move.
fn pending_terminal_reward(end: &EpisodeEnd, side: Color, options: &EnvOptions) -> f64 {
    match end.winner() {
        Some(winner) if winner == side => options.win_reward,
        Some(_) => options.loss_reward,
        None => options.draw_reward,
    }
}

/// Play one game. `agent_color` says which side the learning agent plays
/// when `opponent` is scripted; under `SelfPlay` the agent drives both
/// sides and both sides' transitions are recorded.
pub fn play_episode(
    agent: &DqnAgent,
    opponent: &OpponentKind,
    agent_color: Color,
    options: &EnvOptions,
    epsilon: f64,
    rng: &mut ChaCha8Rng,
    deadline: Option<Instant>,
) -> EpisodeOutcome {
    let mut env = ChessEnv::new(options.clone());
    let mut state = env.reset();
    let mut experiences: Vec<Experience> = Vec::new();
    let mut last_recorded: [Option<usize>; 2] = [None, None];
    let mut end = None;

    loop {
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                return EpisodeOutcome::DeadlineAborted;
            }
        }

        let mover = env.side_to_move();
        let agent_drives = opponent.is_self_play() || mover == agent_color;

        let mask = env.valid_actions();
        let action = if agent_drives {
            agent.select_action(&state, &mask, epsilon, rng)
        } else {
            opponent
                .choose_move(env.board(), rng)
                .map(|m| move_to_action_index(&m))
        };
        let action = match action {
            Some(a) => a,
            // No legal action means the previous step should have reported
            // done; treat as a failed game rather than guessing.
            None => {
                warn!("no action available in a non-terminal position");
                return EpisodeOutcome::Failed;
            }
        };

        let outcome = match env.step(action) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(%err, board = %env.board(), "environment rejected a step");
                return EpisodeOutcome::Failed;
            }
        };

        if agent_drives {
            let next_actions = if outcome.done {
                ActionMask::new()
            } else {
                env.valid_actions()
            };
            experiences.push(Experience {
                state: state.clone(),
                action: outcome.executed_action,
                reward: outcome.reward,
                next_state: outcome.next_state.clone(),
                next_actions,
                done: outcome.done,
            });
            last_recorded[color_index(mover)] = Some(experiences.len() - 1);
        }

        state = outcome.next_state;

        if outcome.done {
            end = outcome.end;
            // Settle the other side's pending transition.
            if let Some(finish) = &end {
                let other = mover.opposite();
                if let Some(index) = last_recorded[color_index(other)] {
                    let pending = &mut experiences[index];
                    if !pending.done {
                        pending.reward += pending_terminal_reward(finish, other, options);
                        pending.done = true;
                        pending.next_actions = ActionMask::new();
                    }
                }
            }
            break;
        }
    }

    let reward_sum = experiences.iter().map(|e| e.reward).sum();
    EpisodeOutcome::Finished(EpisodeRecord {
        plies: env.steps(),
        reward_sum,
        experiences,
        end,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrainingConfig;
    use rand::SeedableRng;

    fn short_options() -> EnvOptions {
        let mut config = TrainingConfig::default();
        config.max_steps_per_game = 30;
        EnvOptions::for_training(&config)
    }

    fn test_agent() -> DqnAgent {
        let mut config = TrainingConfig::default();
        config.hidden_layers = vec![8];
        config.seed = Some(5);
        DqnAgent::new(&config)
    }

    fn finished(outcome: EpisodeOutcome) -> EpisodeRecord {
        match outcome {
            EpisodeOutcome::Finished(record) => record,
            _ => panic!("episode should finish"),
        }
    }

    #[test]
    fn self_play_records_every_ply_in_move_order() {
        let agent = test_agent();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let record = finished(play_episode(
            &agent,
            &OpponentKind::SelfPlay,
            Color::White,
            &short_options(),
            1.0,
            &mut rng,
            None,
        ));

        assert_eq!(record.experiences.len(), record.plies);
        assert!(record.plies > 0 && record.plies <= 30);

        // Only the two final transitions (one per side) may be terminal,
        // and the last one always is.
        assert!(record.experiences.last().unwrap().done);
        let n = record.experiences.len();
        for e in &record.experiences[..n.saturating_sub(2)] {
            assert!(!e.done);
        }
    }

    #[test]
    fn terminal_rewards_settle_both_sides() {
        // A zero-initialized network with ε = 0 always plays the lowest
        // legal action index, so this queen-up opening adjudicates after
        // exactly two plies: White wins, Black moved last.
        let mut config = TrainingConfig::default();
        config.hidden_layers = vec![4];
        config.seed = Some(5);
        config.weight_init = crate::network::WeightInit::Uniform { limit: 0.0 };
        let agent = DqnAgent::new(&config);

        let mut options = short_options();
        options.start_fen = Some("k7/8/8/8/8/8/8/KQ6 w - - 0 1".to_string());
        options.early_adjudication = true;
        options.resign_material_threshold = 5.0;
        options.resign_plies = 2;

        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let record = finished(play_episode(
            &agent,
            &OpponentKind::SelfPlay,
            Color::White,
            &options,
            0.0,
            &mut rng,
            None,
        ));

        assert_eq!(
            record.end,
            Some(EpisodeEnd::AdjudicatedResign {
                winner: Color::White
            })
        );
        assert_eq!(record.experiences.len(), 2);
        let white = &record.experiences[0];
        let black = &record.experiences[1];
        assert!(white.done && black.done);
        assert_eq!(white.reward, options.win_reward, "patched winner reward");
        assert_eq!(black.reward, options.loss_reward, "final mover lost");
    }

    #[test]
    fn scripted_opponent_plies_are_not_recorded() {
        let agent = test_agent();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let record = finished(play_episode(
            &agent,
            &OpponentKind::Heuristic,
            Color::White,
            &short_options(),
            1.0,
            &mut rng,
            None,
        ));

        assert!(record.experiences.len() < record.plies);
        assert!(record.experiences.len() * 2 <= record.plies + 1);
    }

    #[test]
    fn expired_deadline_aborts_and_discards() {
        let agent = test_agent();
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let outcome = play_episode(
            &agent,
            &OpponentKind::SelfPlay,
            Color::White,
            &short_options(),
            1.0,
            &mut rng,
            Some(Instant::now()),
        );
        assert!(matches!(outcome, EpisodeOutcome::DeadlineAborted));
    }

    #[test]
    fn done_transitions_carry_empty_masks() {
        let agent = test_agent();
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let record = finished(play_episode(
            &agent,
            &OpponentKind::SelfPlay,
            Color::White,
            &short_options(),
            1.0,
            &mut rng,
            None,
        ));
        for e in &record.experiences {
            if e.done {
                assert!(e.next_actions.is_empty());
            } else {
                assert!(!e.next_actions.is_empty());
            }
        }
    }
}

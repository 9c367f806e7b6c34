//! Periodic strength checks against a fixed opponent. The agent plays
//! greedily (ε = 0), half the games as White and half as Black, and the
//! tally feeds best-checkpoint tracking.

use rand_chacha::ChaCha8Rng;

use crate::dqn::DqnAgent;
use crate::encoding::move_to_action_index;
use crate::env::{ChessEnv, EnvOptions};
use crate::piece::Color;
use crate::selfplay::opponent::OpponentKind;

#[derive(Clone, Copy, PartialEq, Debug, Default)]
pub struct EvalSummary {
    pub games: usize,
    pub wins: usize,
    pub draws: usize,
    pub losses: usize,
    pub average_length: f64,
}

impl EvalSummary {
    pub fn win_rate(&self) -> f64 {
        if self.games == 0 {
            0.0
        } else {
            self.wins as f64 / self.games as f64
        }
    }
}

/// Play one evaluation game; returns (agent score, plies) where the score
/// is +1 for an agent win, 0 for a draw, -1 for a loss.
fn play_eval_game(
    agent: &DqnAgent,
    opponent: &OpponentKind,
    agent_color: Color,
    options: &EnvOptions,
    rng: &mut ChaCha8Rng,
) -> (i32, usize) {
    let mut env = ChessEnv::new(options.clone());
    let mut state = env.reset();

    let end = loop {
        let mover = env.side_to_move();
        let agent_moves = opponent.is_self_play() || mover == agent_color;

        let mask = env.valid_actions();
        let action = if agent_moves {
            agent.select_action(&state, &mask, 0.0, rng)
        } else {
            opponent
                .choose_move(env.board(), rng)
                .map(|m| move_to_action_index(&m))
        };
        let action = match action {
            Some(a) => a,
            None => break None,
        };

        match env.step(action) {
            Ok(outcome) => {
                state = outcome.next_state;
                if outcome.done {
                    break outcome.end;
                }
            }
            Err(_) => break None,
        }
    };

    let score = match end.and_then(|e| e.winner()) {
        Some(winner) if winner == agent_color => 1,
        Some(_) => -1,
        None => 0,
    };
    (score, env.steps())
}

/// Play `games` evaluation games, alternating the agent's color.
pub fn evaluate_agent(
    agent: &DqnAgent,
    opponent: &OpponentKind,
    games: usize,
    options: &EnvOptions,
    rng: &mut ChaCha8Rng,
) -> EvalSummary {
    let mut summary = EvalSummary {
        games,
        ..Default::default()
    };
    let mut total_plies = 0usize;

    for game in 0..games {
        let agent_color = if game % 2 == 0 {
            Color::White
        } else {
            Color::Black
        };
        let (score, plies) = play_eval_game(agent, opponent, agent_color, options, rng);
        match score {
            1 => summary.wins += 1,
            -1 => summary.losses += 1,
            _ => summary.draws += 1,
        }
        total_plies += plies;
    }

    if games > 0 {
        summary.average_length = total_plies as f64 / games as f64;
    }
    summary
}

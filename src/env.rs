//! The chess-as-MDP adapter: one board behind a reset/step interface.
//!
//! Rewards are always from the perspective of the side that just moved.
//! Terminal rewards for the side that did *not* move last are assigned by
//! the episode recorder (see `selfplay::worker`), which patches that side's
//! final pending transition.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::board::{Board, GameStatus};
use crate::config::TrainingConfig;
use crate::encoding::{self, ActionMask};
use crate::piece::Color;

/// What to do when the agent picks an action that is not legal.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub enum IllegalActionPolicy {
    /// End the episode; the offender collects the illegal-move penalty.
    /// Keeps the replay distribution honest, the strict default.
    Terminate,
    /// Substitute the lowest-index legal action and apply a small shaping
    /// penalty to the executed step.
    FallBack,
}

#[derive(Error, Clone, Copy, PartialEq, Eq, Debug)]
pub enum EnvError {
    #[error("step called on a finished episode")]
    EpisodeOver,
    #[error("action {0} is outside the action space")]
    BadAction(u16),
}

/// Environment parameters, split out of `TrainingConfig` because training
/// and evaluation games adjudicate differently.
#[derive(Clone, Debug)]
pub struct EnvOptions {
    /// Opening position as FEN; `None` starts from the standard position.
    pub start_fen: Option<String>,
    pub max_steps: usize,
    pub win_reward: f64,
    pub loss_reward: f64,
    pub draw_reward: f64,
    pub step_limit_penalty: f64,
    pub illegal_move_penalty: f64,
    pub fallback_penalty: f64,
    pub illegal_action_policy: IllegalActionPolicy,
    pub early_adjudication: bool,
    pub resign_material_threshold: f64,
    pub resign_plies: u32,
    pub no_progress_plies: u32,
}

impl EnvOptions {
    pub fn for_training(config: &TrainingConfig) -> Self {
        EnvOptions {
            start_fen: None,
            max_steps: config.max_steps_per_game,
            win_reward: config.win_reward,
            loss_reward: config.loss_reward,
            draw_reward: config.draw_reward,
            step_limit_penalty: config.step_limit_penalty,
            illegal_move_penalty: config.illegal_move_penalty,
            fallback_penalty: config.fallback_penalty,
            illegal_action_policy: config.illegal_action_policy,
            early_adjudication: config.train_early_adjudication,
            resign_material_threshold: config.train_resign_material_threshold,
            resign_plies: 8,
            no_progress_plies: config.train_no_progress_plies,
        }
    }

    pub fn for_evaluation(config: &TrainingConfig) -> Self {
        EnvOptions {
            early_adjudication: config.eval_early_adjudication,
            resign_material_threshold: config.eval_resign_material_threshold,
            no_progress_plies: config.eval_no_progress_plies,
            ..Self::for_training(config)
        }
    }
}

/// Why an episode ended.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum EpisodeEnd {
    Checkmate { winner: Color },
    Draw { status: GameStatus },
    StepLimit,
    IllegalAction { offender: Color },
    AdjudicatedResign { winner: Color },
    AdjudicatedDraw,
}

impl EpisodeEnd {
    pub fn winner(&self) -> Option<Color> {
        match self {
            EpisodeEnd::Checkmate { winner } | EpisodeEnd::AdjudicatedResign { winner } => {
                Some(*winner)
            }
            EpisodeEnd::IllegalAction { offender } => Some(offender.opposite()),
            _ => None,
        }
    }
}

#[derive(Clone, PartialEq, Debug)]
pub struct StepOutcome {
    pub next_state: Vec<f64>,
    pub reward: f64,
    pub done: bool,
    /// The action actually applied (differs from the request under the
    /// fall-back policy).
    pub executed_action: u16,
    pub end: Option<EpisodeEnd>,
}

pub struct ChessEnv {
    board: Board,
    options: EnvOptions,
    steps: usize,
    finished: bool,
    /// Consecutive plies the leader has been ahead by at least the resign
    /// threshold, per color.
    ahead_plies: [u32; 2],
}

impl ChessEnv {
    pub fn new(options: EnvOptions) -> Self {
        let mut env = ChessEnv {
            board: Board::new(),
            options,
            steps: 0,
            finished: false,
            ahead_plies: [0, 0],
        };
        env.reset();
        env
    }

    fn starting_board(&self) -> Board {
        let Some(fen) = &self.options.start_fen else {
            return Board::new();
        };
        match Board::from_fen(fen) {
            Ok(board) if board.validate_kings() => board,
            Ok(_) => {
                warn!(fen = %fen, "opening FEN lacks kings; starting from the standard position");
                Board::new()
            }
            Err(err) => {
                warn!(%err, fen = %fen, "bad opening FEN; starting from the standard position");
                Board::new()
            }
        }
    }

    /// Fresh board at the configured opening (standard by default); returns
    /// its encoded features.
    pub fn reset(&mut self) -> Vec<f64> {
        self.board = self.starting_board();
        self.steps = 0;
        self.finished = false;
        self.ahead_plies = [0, 0];
        encoding::board_to_features(&self.board)
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn side_to_move(&self) -> Color {
        self.board.current_turn
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Legal actions of the side to move, as a bitset over the action
    /// space.
    pub fn valid_actions(&self) -> ActionMask {
        ActionMask::from_board(&self.board)
    }

    fn finish(&mut self, reward: f64, executed_action: u16, end: EpisodeEnd) -> StepOutcome {
        self.finished = true;
        StepOutcome {
            next_state: encoding::board_to_features(&self.board),
            reward,
            done: true,
            executed_action,
            end: Some(end),
        }
    }

    /// Decode, legality-check and apply one action for the side to move,
    /// then score it.
    pub fn step(&mut self, action: u16) -> Result<StepOutcome, EnvError> {
        if self.finished {
            return Err(EnvError::EpisodeOver);
        }
        let mover = self.board.current_turn;

        let requested = encoding::action_index_to_move(action, &self.board)
            .ok_or(EnvError::BadAction(action))?;

        let mut executed_action = action;
        let mut shaping = 0.0;
        let legal = self.board.generate_legal_moves(mover);
        let chosen = if legal.contains(&requested) {
            requested
        } else {
            match self.options.illegal_action_policy {
                IllegalActionPolicy::Terminate => {
                    warn!(action, ?mover, "illegal action; episode terminated");
                    let penalty = self.options.illegal_move_penalty;
                    return Ok(self.finish(
                        penalty,
                        action,
                        EpisodeEnd::IllegalAction { offender: mover },
                    ));
                }
                IllegalActionPolicy::FallBack => {
                    let fallback = self
                        .valid_actions()
                        .iter()
                        .next()
                        .and_then(|a| encoding::action_index_to_move(a, &self.board));
                    match fallback {
                        Some(m) => {
                            warn!(action, ?mover, "illegal action; falling back to a legal move");
                            shaping = self.options.fallback_penalty;
                            executed_action = encoding::move_to_action_index(&m);
                            m
                        }
                        None => {
                            // No legal move at all: the caller stepped a
                            // terminal position without asking.
                            let penalty = self.options.illegal_move_penalty;
                            return Ok(self.finish(
                                penalty,
                                action,
                                EpisodeEnd::IllegalAction { offender: mover },
                            ));
                        }
                    }
                }
            }
        };

        let outcome = self
            .board
            .make_move(&chosen)
            .expect("move drawn from the legal list");
        self.steps += 1;

        // Natural terminal states first.
        match outcome.status {
            GameStatus::WhiteWins | GameStatus::BlackWins => {
                let winner = outcome.status.winner().expect("decisive status");
                let reward = if winner == mover {
                    self.options.win_reward
                } else {
                    self.options.loss_reward
                };
                return Ok(self.finish(reward + shaping, executed_action, EpisodeEnd::Checkmate { winner }));
            }
            status if status.is_draw() => {
                return Ok(self.finish(
                    self.options.draw_reward + shaping,
                    executed_action,
                    EpisodeEnd::Draw { status },
                ));
            }
            _ => {}
        }

        if self.options.early_adjudication {
            if let Some(end) = self.adjudicate() {
                let reward = match end.winner() {
                    Some(winner) if winner == mover => self.options.win_reward,
                    Some(_) => self.options.loss_reward,
                    None => self.options.draw_reward,
                };
                return Ok(self.finish(reward + shaping, executed_action, end));
            }
        }

        if self.steps >= self.options.max_steps {
            return Ok(self.finish(
                self.options.step_limit_penalty + shaping,
                executed_action,
                EpisodeEnd::StepLimit,
            ));
        }

        Ok(StepOutcome {
            next_state: encoding::board_to_features(&self.board),
            reward: shaping,
            done: false,
            executed_action,
            end: None,
        })
    }

    /// Resign on a sustained decisive material lead; draw when nothing has
    /// progressed (no capture, no pawn move) for long enough. The halfmove
    /// clock already counts exactly the no-progress plies.
    fn adjudicate(&mut self) -> Option<EpisodeEnd> {
        if self.board.halfmove_clock >= self.options.no_progress_plies {
            return Some(EpisodeEnd::AdjudicatedDraw);
        }

        let balance = self.board.material_balance();
        if balance >= self.options.resign_material_threshold {
            self.ahead_plies[0] += 1;
            self.ahead_plies[1] = 0;
        } else if -balance >= self.options.resign_material_threshold {
            self.ahead_plies[1] += 1;
            self.ahead_plies[0] = 0;
        } else {
            self.ahead_plies = [0, 0];
        }

        if self.ahead_plies[0] >= self.options.resign_plies {
            return Some(EpisodeEnd::AdjudicatedResign {
                winner: Color::White,
            });
        }
        if self.ahead_plies[1] >= self.options.resign_plies {
            return Some(EpisodeEnd::AdjudicatedResign {
                winner: Color::Black,
            });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::move_to_action_index;
    use crate::moves::Move;
    use crate::piece::{Piece, PieceType};

    fn options() -> EnvOptions {
        EnvOptions::for_training(&TrainingConfig::default())
    }

    fn action(uci: &str) -> u16 {
        move_to_action_index(&Move::from_uci(uci).unwrap())
    }

    #[test]
    fn reset_returns_start_features() {
        let mut env = ChessEnv::new(options());
        let state = env.reset();
        assert_eq!(state, encoding::board_to_features(&Board::new()));
        assert_eq!(env.valid_actions().count(), 20);
        assert_eq!(env.side_to_move(), Color::White);
    }

    #[test]
    fn legal_step_advances_the_game() {
        let mut env = ChessEnv::new(options());
        env.reset();
        let out = env.step(action("e2e4")).unwrap();
        assert_eq!(out.reward, 0.0);
        assert!(!out.done);
        assert_eq!(env.side_to_move(), Color::Black);
        assert_eq!(out.next_state, encoding::board_to_features(env.board()));
    }

    #[test]
    fn illegal_action_terminates_under_strict_policy() {
        let mut env = ChessEnv::new(options());
        env.reset();
        let out = env.step(action("e2e5")).unwrap();
        assert!(out.done);
        assert_eq!(out.reward, options().illegal_move_penalty);
        assert_eq!(
            out.end,
            Some(EpisodeEnd::IllegalAction {
                offender: Color::White
            })
        );
        assert!(env.is_finished());
        assert_eq!(env.step(action("e2e4")), Err(EnvError::EpisodeOver));
    }

    #[test]
    fn illegal_action_substitutes_under_fallback_policy() {
        let mut opts = options();
        opts.illegal_action_policy = IllegalActionPolicy::FallBack;
        let penalty = opts.fallback_penalty;
        let mut env = ChessEnv::new(opts);
        env.reset();

        let requested = action("e2e5");
        let out = env.step(requested).unwrap();
        assert!(!out.done);
        assert_eq!(out.reward, penalty);
        assert_ne!(out.executed_action, requested);
        assert_eq!(env.side_to_move(), Color::Black);
    }

    #[test]
    fn out_of_range_action_is_a_caller_error() {
        let mut env = ChessEnv::new(options());
        env.reset();
        assert_eq!(env.step(4100), Err(EnvError::BadAction(4100)));
    }

    #[test]
    fn mover_collects_the_win_reward_on_mate() {
        // Fool's mate: 1. f3 e5 2. g4 Qh4#
        let mut env = ChessEnv::new(options());
        env.reset();
        env.step(action("f2f3")).unwrap();
        env.step(action("e7e5")).unwrap();
        env.step(action("g2g4")).unwrap();
        let out = env.step(action("d8h4")).unwrap();

        assert!(out.done);
        assert_eq!(out.reward, options().win_reward);
        assert_eq!(
            out.end,
            Some(EpisodeEnd::Checkmate {
                winner: Color::Black
            })
        );
    }

    #[test]
    fn step_limit_ends_the_episode_with_a_penalty() {
        let mut opts = options();
        opts.max_steps = 3;
        let penalty = opts.step_limit_penalty;
        let mut env = ChessEnv::new(opts);
        env.reset();
        env.step(action("g1f3")).unwrap();
        env.step(action("g8f6")).unwrap();
        let out = env.step(action("f3g1")).unwrap();
        assert!(out.done);
        assert_eq!(out.reward, penalty);
        assert_eq!(out.end, Some(EpisodeEnd::StepLimit));
    }

    #[test]
    fn no_progress_adjudication_draws() {
        let mut opts = options();
        opts.early_adjudication = true;
        opts.no_progress_plies = 4;
        let draw = opts.draw_reward;
        let mut env = ChessEnv::new(opts);
        env.reset();
        env.step(action("g1f3")).unwrap();
        env.step(action("g8f6")).unwrap();
        env.step(action("f3g1")).unwrap();
        let out = env.step(action("f6g8")).unwrap();
        assert!(out.done);
        assert_eq!(out.end, Some(EpisodeEnd::AdjudicatedDraw));
        assert_eq!(out.reward, draw);
    }

    #[test]
    fn material_collapse_adjudicates_a_resignation() {
        let mut opts = options();
        opts.early_adjudication = true;
        opts.resign_material_threshold = 5.0;
        opts.resign_plies = 2;
        let mut env = ChessEnv::new(opts);
        env.reset();

        // Hand Black a hopeless deficit, then play quiet moves.
        env.board.set_piece_at(7, 3, None); // black queen
        env.board.set_piece_at(7, 0, None); // black rook
        let out1 = env.step(action("g1f3")).unwrap();
        assert!(!out1.done, "one ply ahead is not enough yet");
        let out2 = env.step(action("g8f6")).unwrap();
        assert!(out2.done);
        assert_eq!(
            out2.end,
            Some(EpisodeEnd::AdjudicatedResign {
                winner: Color::White
            })
        );
        // Black moved last and lost the adjudication.
        assert_eq!(out2.reward, env.options.loss_reward);
    }

    #[test]
    fn eval_options_mirror_their_own_adjudication_fields() {
        let mut config = TrainingConfig::default();
        config.train_early_adjudication = false;
        config.eval_early_adjudication = true;
        config.eval_no_progress_plies = 12;
        let train = EnvOptions::for_training(&config);
        let eval = EnvOptions::for_evaluation(&config);
        assert!(!train.early_adjudication);
        assert!(eval.early_adjudication);
        assert_eq!(eval.no_progress_plies, 12);
        assert_eq!(eval.max_steps, train.max_steps);
    }
}

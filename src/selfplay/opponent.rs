//! Scripted opponents for training against a fixed policy and for
//! evaluation games.
//!
//! `Heuristic` is a one-ply material greedy player; `Minimax` is a negamax
//! search with alpha-beta pruning over a material evaluation, with captures
//! and promotions searched first so pruning bites. Both break ties randomly
//! so repeated games do not replay one line.

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::board::Board;
use crate::moves::Move;
use crate::piece::{Color, PieceType};

/// Opponent selection for one side of a game. `SelfPlay` means the learning
/// agent moves for this side too (sharing the live network).
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub enum OpponentKind {
    SelfPlay,
    Heuristic,
    Minimax { depth: u32 },
}

impl OpponentKind {
    pub fn is_self_play(&self) -> bool {
        matches!(self, OpponentKind::SelfPlay)
    }

    /// Pick a move for the side to move. `None` only when the position has
    /// no legal moves or for `SelfPlay` (the caller drives the agent).
    pub fn choose_move(&self, board: &Board, rng: &mut ChaCha8Rng) -> Option<Move> {
        match self {
            OpponentKind::SelfPlay => None,
            OpponentKind::Heuristic => greedy_move(board, rng),
            OpponentKind::Minimax { depth } => minimax_move(board, *depth, rng),
        }
    }
}

const MATE_SCORE: f64 = 10_000.0;

/// Capture/promotion priority for move ordering: most valuable victim
/// first, least valuable attacker as the tiebreak.
fn move_priority(board: &Board, m: &Move) -> i32 {
    let mut score = 0;

    if let Some(promo) = m.promotion {
        score += 900 + promo.value() as i32;
    }

    if let Some(victim) = board.piece_at(m.to.0, m.to.1) {
        let attacker = board
            .piece_at(m.from.0, m.from.1)
            .map(|p| p.piece_type.value() as i32)
            .unwrap_or(0);
        score += 100 + victim.piece_type.value() as i32 * 10 - attacker;
    }

    score
}

fn order_moves(board: &Board, moves: &mut [Move]) {
    moves.sort_by_key(|m| std::cmp::Reverse(move_priority(board, m)));
}

/// Immediate material gain of a move, from the mover's point of view.
fn capture_gain(board: &Board, m: &Move) -> f64 {
    let mut gain = board
        .piece_at(m.to.0, m.to.1)
        .map(|p| p.piece_type.value())
        .unwrap_or(0.0);
    if board.en_passant_target == Some(m.to)
        && board
            .piece_at(m.from.0, m.from.1)
            .map(|p| p.piece_type == PieceType::Pawn)
            .unwrap_or(false)
    {
        gain += PieceType::Pawn.value();
    }
    if let Some(promo) = m.promotion {
        gain += promo.value() - PieceType::Pawn.value();
    }
    gain
}

/// One-ply greedy: grab the biggest capture, random among ties.
fn greedy_move(board: &Board, rng: &mut ChaCha8Rng) -> Option<Move> {
    let moves = board.generate_legal_moves(board.current_turn);
    if moves.is_empty() {
        return None;
    }

    let best = moves
        .iter()
        .map(|m| capture_gain(board, m))
        .fold(f64::NEG_INFINITY, f64::max);
    let top: Vec<&Move> = moves
        .iter()
        .filter(|m| capture_gain(board, m) == best)
        .collect();
    Some(top[rng.gen_range(0..top.len())].clone())
}

/// Material balance from the side to move's perspective.
fn evaluate(board: &Board) -> f64 {
    match board.current_turn {
        Color::White => board.material_balance(),
        Color::Black => -board.material_balance(),
    }
}

/// Negamax with alpha-beta pruning. Scores are from the current player's
/// perspective; each recursion negates, which removes the min/max split.
fn negamax(board: &Board, depth: u32, mut alpha: f64, beta: f64) -> f64 {
    let mut moves = board.generate_legal_moves(board.current_turn);
    if moves.is_empty() {
        return if board.is_in_check(board.current_turn) {
            // Deeper mates score slightly worse so faster mates win.
            -MATE_SCORE - depth as f64
        } else {
            0.0
        };
    }
    if depth == 0 {
        return evaluate(board);
    }

    order_moves(board, &mut moves);

    let mut best = f64::NEG_INFINITY;
    for m in &moves {
        let mut next = board.clone();
        next.apply_move_unchecked(m);
        let score = -negamax(&next, depth - 1, -beta, -alpha);
        best = best.max(score);
        alpha = alpha.max(score);
        if alpha >= beta {
            break;
        }
    }

    best
}

fn minimax_move(board: &Board, depth: u32, rng: &mut ChaCha8Rng) -> Option<Move> {
    let mut moves = board.generate_legal_moves(board.current_turn);
    if moves.is_empty() {
        return None;
    }
    order_moves(board, &mut moves);

    let depth = depth.max(1);
    let mut scored: Vec<(Move, f64)> = Vec::with_capacity(moves.len());
    for m in moves {
        let mut next = board.clone();
        next.apply_move_unchecked(&m);
        let score = -negamax(&next, depth - 1, f64::NEG_INFINITY, f64::INFINITY);
        scored.push((m, score));
    }

    let best = scored
        .iter()
        .map(|(_, s)| *s)
        .fold(f64::NEG_INFINITY, f64::max);
    let top: Vec<&(Move, f64)> = scored
        .iter()
        .filter(|(_, s)| (s - best).abs() < 1e-9)
        .collect();
    Some(top[rng.gen_range(0..top.len())].0.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::piece::Piece;
    use rand::SeedableRng;

    fn rng() -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(0)
    }

    fn place(board: &mut Board, row: usize, col: usize, pt: PieceType, color: Color) {
        board.set_piece_at(row, col, Some(Piece::new(pt, color)));
    }

    #[test]
    fn self_play_defers_to_the_agent() {
        assert_eq!(
            OpponentKind::SelfPlay.choose_move(&Board::new(), &mut rng()),
            None
        );
    }

    #[test]
    fn heuristic_takes_the_biggest_capture() {
        let mut board = Board::empty();
        place(&mut board, 0, 4, PieceType::King, Color::White);
        place(&mut board, 7, 4, PieceType::King, Color::Black);
        place(&mut board, 3, 3, PieceType::Rook, Color::White);
        place(&mut board, 3, 7, PieceType::Pawn, Color::Black);
        place(&mut board, 5, 3, PieceType::Queen, Color::Black);
        board.current_turn = Color::White;

        let m = OpponentKind::Heuristic
            .choose_move(&board, &mut rng())
            .unwrap();
        assert_eq!(m.to, (5, 3), "rook should take the queen, took {m:?}");
    }

    #[test]
    fn minimax_finds_mate_in_one() {
        // White Ra8# against a bare back-rank king.
        let mut board = Board::empty();
        place(&mut board, 0, 4, PieceType::King, Color::White);
        place(&mut board, 7, 6, PieceType::King, Color::Black);
        place(&mut board, 6, 0, PieceType::Rook, Color::White);
        place(&mut board, 5, 1, PieceType::Rook, Color::White);
        board.current_turn = Color::White;

        let m = OpponentKind::Minimax { depth: 2 }
            .choose_move(&board, &mut rng())
            .unwrap();
        let mut next = board.clone();
        next.make_move(&m).unwrap();
        assert_eq!(
            next.game_status(),
            crate::board::GameStatus::WhiteWins,
            "expected a mating move, got {m:?}"
        );
    }

    #[test]
    fn minimax_avoids_hanging_the_queen() {
        // Greedy would take the pawn and lose the queen to the rook.
        let mut board = Board::empty();
        place(&mut board, 0, 4, PieceType::King, Color::White);
        place(&mut board, 7, 4, PieceType::King, Color::Black);
        place(&mut board, 3, 0, PieceType::Queen, Color::White);
        place(&mut board, 5, 0, PieceType::Pawn, Color::Black);
        place(&mut board, 5, 7, PieceType::Rook, Color::Black);
        board.current_turn = Color::White;

        let m = OpponentKind::Minimax { depth: 2 }
            .choose_move(&board, &mut rng())
            .unwrap();
        assert_ne!(m.to, (5, 0), "queen must not take the defended pawn");
    }

    #[test]
    fn scripted_opponents_always_move_when_moves_exist() {
        let board = Board::new();
        for kind in [OpponentKind::Heuristic, OpponentKind::Minimax { depth: 1 }] {
            let m = kind.choose_move(&board, &mut rng()).unwrap();
            assert!(board.generate_legal_moves(Color::White).contains(&m));
        }
    }
}

//! Board state and the full rules of chess.
//!
//! The board is an 8×8 mailbox of `Option<Piece>` plus the game state a
//! position needs beyond piece placement: side to move, castling rights,
//! en-passant target, halfmove clock, fullmove number and the history of
//! position keys for the repetition rule.
//!
//! Coordinate system: row 0 = rank 1 (White's first rank), col 0 = file a.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::moves::Move;
use crate::piece::{Color, Piece, PieceType};
use crate::zobrist;

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct CastlingRights {
    pub white_kingside: bool,
    pub white_queenside: bool,
    pub black_kingside: bool,
    pub black_queenside: bool,
}

impl CastlingRights {
    pub fn all() -> Self {
        CastlingRights {
            white_kingside: true,
            white_queenside: true,
            black_kingside: true,
            black_queenside: true,
        }
    }

    pub fn none() -> Self {
        CastlingRights {
            white_kingside: false,
            white_queenside: false,
            black_kingside: false,
            black_queenside: false,
        }
    }
}

/// Outcome classification of a position, from the point of view of the side
/// to move. `Ongoing` and `Check` are the only non-terminal states.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub enum GameStatus {
    Ongoing,
    Check,
    WhiteWins,
    BlackWins,
    DrawStalemate,
    DrawInsufficientMaterial,
    DrawFiftyMoveRule,
    DrawRepetition,
}

impl GameStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, GameStatus::Ongoing | GameStatus::Check)
    }

    pub fn is_draw(&self) -> bool {
        matches!(
            self,
            GameStatus::DrawStalemate
                | GameStatus::DrawInsufficientMaterial
                | GameStatus::DrawFiftyMoveRule
                | GameStatus::DrawRepetition
        )
    }

    pub fn winner(&self) -> Option<Color> {
        match self {
            GameStatus::WhiteWins => Some(Color::White),
            GameStatus::BlackWins => Some(Color::Black),
            _ => None,
        }
    }
}

/// Why a move was rejected. Returned as a value; the board is untouched.
#[derive(Error, Clone, Copy, PartialEq, Eq, Debug)]
pub enum MoveError {
    #[error("no piece on the source square")]
    NoPieceAtSource,
    #[error("the piece on the source square belongs to the other side")]
    NotYourPiece,
    #[error("move is not legal in this position")]
    IllegalMove,
    #[error("a pawn reaching the last rank must name a promotion piece")]
    PromotionExpected,
    #[error("promotion given for a move that cannot promote")]
    UnexpectedPromotion,
}

/// What `make_move` did: the capture (if any) and the status of the
/// resulting position.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct MoveOutcome {
    pub captured: Option<PieceType>,
    pub status: GameStatus,
}

#[derive(Clone, PartialEq, Serialize, Deserialize, Debug)]
pub struct Board {
    pub squares: [[Option<Piece>; 8]; 8],
    pub current_turn: Color,
    pub castling_rights: CastlingRights,
    pub en_passant_target: Option<(usize, usize)>,
    pub halfmove_clock: u32,
    pub fullmove_number: u32,
    pub position_history: Vec<u64>,
}

impl Default for Board {
    fn default() -> Self {
        Self::new()
    }
}

const KNIGHT_OFFSETS: [(i32, i32); 8] = [
    (-2, -1), (-2, 1), (-1, -2), (-1, 2),
    (1, -2), (1, 2), (2, -1), (2, 1),
];

const STRAIGHT_DIRS: [(i32, i32); 4] = [(0, 1), (0, -1), (1, 0), (-1, 0)];
const DIAGONAL_DIRS: [(i32, i32); 4] = [(1, 1), (1, -1), (-1, 1), (-1, -1)];

impl Board {
    /// An empty board with no pieces and no castling rights. Useful for
    /// setting up test positions.
    pub fn empty() -> Self {
        Board {
            squares: [[None; 8]; 8],
            current_turn: Color::White,
            castling_rights: CastlingRights::none(),
            en_passant_target: None,
            halfmove_clock: 0,
            fullmove_number: 1,
            position_history: Vec::new(),
        }
    }

    /// The standard starting position.
    pub fn new() -> Self {
        let mut board = Board::empty();
        let back_rank = [
            PieceType::Rook,
            PieceType::Knight,
            PieceType::Bishop,
            PieceType::Queen,
            PieceType::King,
            PieceType::Bishop,
            PieceType::Knight,
            PieceType::Rook,
        ];
        for (col, pt) in back_rank.into_iter().enumerate() {
            board.squares[0][col] = Some(Piece::new(pt, Color::White));
            board.squares[7][col] = Some(Piece::new(pt, Color::Black));
        }
        for col in 0..8 {
            board.squares[1][col] = Some(Piece::new(PieceType::Pawn, Color::White));
            board.squares[6][col] = Some(Piece::new(PieceType::Pawn, Color::Black));
        }
        board.castling_rights = CastlingRights::all();
        board.record_position();
        board
    }

    fn in_bounds(row: i32, col: i32) -> bool {
        (0..8).contains(&row) && (0..8).contains(&col)
    }

    pub fn piece_at(&self, row: usize, col: usize) -> Option<Piece> {
        self.squares[row][col]
    }

    pub fn set_piece_at(&mut self, row: usize, col: usize, piece: Option<Piece>) {
        self.squares[row][col] = piece;
    }

    /// Remove every piece. Game-state fields are left as they are; callers
    /// setting up a position are expected to assign them explicitly.
    pub fn clear(&mut self) {
        self.squares = [[None; 8]; 8];
        self.position_history.clear();
    }

    pub fn find_king(&self, color: Color) -> Option<(usize, usize)> {
        for row in 0..8 {
            for col in 0..8 {
                if let Some(p) = self.squares[row][col] {
                    if p.piece_type == PieceType::King && p.color == color {
                        return Some((row, col));
                    }
                }
            }
        }
        None
    }

    /// Exactly one king per color. Positions built from FEN or by hand must
    /// pass this before being played.
    pub fn validate_kings(&self) -> bool {
        let mut white = 0;
        let mut black = 0;
        for row in 0..8 {
            for col in 0..8 {
                if let Some(p) = self.squares[row][col] {
                    if p.piece_type == PieceType::King {
                        match p.color {
                            Color::White => white += 1,
                            Color::Black => black += 1,
                        }
                    }
                }
            }
        }
        white == 1 && black == 1
    }

    /// Append the current position key to the repetition history.
    pub(crate) fn record_position(&mut self) {
        let key = zobrist::key(self);
        self.position_history.push(key);
    }

    // ------------------------------------------------------------------
    // Attack detection
    // ------------------------------------------------------------------

    /// True if any piece of `attacker` attacks the square. Pawns attack
    /// diagonally only; pawn pushes never attack.
    pub fn is_square_attacked_by(&self, row: usize, col: usize, attacker: Color) -> bool {
        for (dr, dc) in &KNIGHT_OFFSETS {
            let r = row as i32 + dr;
            let c = col as i32 + dc;
            if Self::in_bounds(r, c) {
                if let Some(p) = self.squares[r as usize][c as usize] {
                    if p.color == attacker && p.piece_type == PieceType::Knight {
                        return true;
                    }
                }
            }
        }

        for dr in -1i32..=1 {
            for dc in -1i32..=1 {
                if dr == 0 && dc == 0 {
                    continue;
                }
                let r = row as i32 + dr;
                let c = col as i32 + dc;
                if Self::in_bounds(r, c) {
                    if let Some(p) = self.squares[r as usize][c as usize] {
                        if p.color == attacker && p.piece_type == PieceType::King {
                            return true;
                        }
                    }
                }
            }
        }

        // A pawn on (row - dir, col ± 1) attacks (row, col).
        let pawn_dir: i32 = if attacker == Color::White { 1 } else { -1 };
        let pawn_row = row as i32 - pawn_dir;
        for dc in &[-1i32, 1] {
            let c = col as i32 + dc;
            if Self::in_bounds(pawn_row, c) {
                if let Some(p) = self.squares[pawn_row as usize][c as usize] {
                    if p.color == attacker && p.piece_type == PieceType::Pawn {
                        return true;
                    }
                }
            }
        }

        for (dirs, matching) in [
            (&STRAIGHT_DIRS, [PieceType::Rook, PieceType::Queen]),
            (&DIAGONAL_DIRS, [PieceType::Bishop, PieceType::Queen]),
        ] {
            for (dr, dc) in dirs {
                let mut r = row as i32 + dr;
                let mut c = col as i32 + dc;
                while Self::in_bounds(r, c) {
                    if let Some(p) = self.squares[r as usize][c as usize] {
                        if p.color == attacker && matching.contains(&p.piece_type) {
                            return true;
                        }
                        break;
                    }
                    r += dr;
                    c += dc;
                }
            }
        }

        false
    }

    pub fn is_in_check(&self, color: Color) -> bool {
        if let Some((kr, kc)) = self.find_king(color) {
            self.is_square_attacked_by(kr, kc, color.opposite())
        } else {
            false
        }
    }

    // ------------------------------------------------------------------
    // Move generation
    // ------------------------------------------------------------------

    /// Pseudo-legal moves: everything the pieces can do, before the
    /// king-safety filter.
    fn generate_moves(&self, color: Color) -> Vec<Move> {
        let mut moves = Vec::new();
        for row in 0..8usize {
            for col in 0..8usize {
                if let Some(piece) = self.squares[row][col] {
                    if piece.color != color {
                        continue;
                    }
                    match piece.piece_type {
                        PieceType::Pawn => self.pawn_moves(row, col, color, &mut moves),
                        PieceType::Knight => self.knight_moves(row, col, color, &mut moves),
                        PieceType::Bishop => {
                            self.sliding_moves(row, col, color, &DIAGONAL_DIRS, &mut moves)
                        }
                        PieceType::Rook => {
                            self.sliding_moves(row, col, color, &STRAIGHT_DIRS, &mut moves)
                        }
                        PieceType::Queen => {
                            self.sliding_moves(row, col, color, &STRAIGHT_DIRS, &mut moves);
                            self.sliding_moves(row, col, color, &DIAGONAL_DIRS, &mut moves);
                        }
                        PieceType::King => self.king_moves(row, col, color, &mut moves),
                    }
                }
            }
        }
        moves
    }

    fn push_pawn_move(
        &self,
        from: (usize, usize),
        to: (usize, usize),
        promo_row: usize,
        moves: &mut Vec<Move>,
    ) {
        if to.0 == promo_row {
            for pt in crate::piece::PROMOTION_TYPES {
                moves.push(Move {
                    from,
                    to,
                    promotion: Some(pt),
                });
            }
        } else {
            moves.push(Move::new(from, to));
        }
    }

    fn pawn_moves(&self, row: usize, col: usize, color: Color, moves: &mut Vec<Move>) {
        let (dir, start_row, promo_row): (i32, usize, usize) = match color {
            Color::White => (1, 1, 7),
            Color::Black => (-1, 6, 0),
        };

        let forward = row as i32 + dir;

        // Single push, and double push when both squares are empty.
        if Self::in_bounds(forward, col as i32) && self.squares[forward as usize][col].is_none() {
            self.push_pawn_move((row, col), (forward as usize, col), promo_row, moves);

            if row == start_row {
                let double = forward + dir;
                if self.squares[double as usize][col].is_none() {
                    moves.push(Move::new((row, col), (double as usize, col)));
                }
            }
        }

        // Diagonal captures, including en passant.
        for dc in &[-1i32, 1] {
            let c = col as i32 + dc;
            if !Self::in_bounds(forward, c) {
                continue;
            }
            let to = (forward as usize, c as usize);
            let takes_enemy = self.squares[to.0][to.1]
                .map(|p| p.color != color)
                .unwrap_or(false);
            if takes_enemy || self.en_passant_target == Some(to) {
                self.push_pawn_move((row, col), to, promo_row, moves);
            }
        }
    }

    fn knight_moves(&self, row: usize, col: usize, color: Color, moves: &mut Vec<Move>) {
        for (dr, dc) in &KNIGHT_OFFSETS {
            let r = row as i32 + dr;
            let c = col as i32 + dc;
            if !Self::in_bounds(r, c) {
                continue;
            }
            let to = (r as usize, c as usize);
            if self.squares[to.0][to.1].map(|p| p.color == color).unwrap_or(false) {
                continue;
            }
            moves.push(Move::new((row, col), to));
        }
    }

    fn sliding_moves(
        &self,
        row: usize,
        col: usize,
        color: Color,
        directions: &[(i32, i32)],
        moves: &mut Vec<Move>,
    ) {
        for (dr, dc) in directions {
            let mut r = row as i32 + dr;
            let mut c = col as i32 + dc;
            while Self::in_bounds(r, c) {
                let to = (r as usize, c as usize);
                if let Some(p) = self.squares[to.0][to.1] {
                    if p.color != color {
                        moves.push(Move::new((row, col), to));
                    }
                    break;
                }
                moves.push(Move::new((row, col), to));
                r += dr;
                c += dc;
            }
        }
    }

    fn king_moves(&self, row: usize, col: usize, color: Color, moves: &mut Vec<Move>) {
        for dr in -1..=1i32 {
            for dc in -1..=1i32 {
                if dr == 0 && dc == 0 {
                    continue;
                }
                let r = row as i32 + dr;
                let c = col as i32 + dc;
                if !Self::in_bounds(r, c) {
                    continue;
                }
                let to = (r as usize, c as usize);
                if self.squares[to.0][to.1].map(|p| p.color == color).unwrap_or(false) {
                    continue;
                }
                moves.push(Move::new((row, col), to));
            }
        }

        self.castling_moves(row, col, color, moves);
    }

    fn castling_moves(&self, row: usize, col: usize, color: Color, moves: &mut Vec<Move>) {
        let back_rank = match color {
            Color::White => 0,
            Color::Black => 7,
        };

        if row != back_rank || col != 4 {
            return;
        }

        // Castling out of check is never allowed.
        if self.is_in_check(color) {
            return;
        }

        let enemy = color.opposite();
        let rook_at = |c: usize| {
            self.squares[back_rank][c]
                .map(|p| p.piece_type == PieceType::Rook && p.color == color)
                .unwrap_or(false)
        };

        let kingside_right = match color {
            Color::White => self.castling_rights.white_kingside,
            Color::Black => self.castling_rights.black_kingside,
        };
        // Squares between king and rook empty, rook in place, and neither
        // the square the king crosses nor its destination attacked.
        if kingside_right
            && self.squares[back_rank][5].is_none()
            && self.squares[back_rank][6].is_none()
            && rook_at(7)
            && !self.is_square_attacked_by(back_rank, 5, enemy)
            && !self.is_square_attacked_by(back_rank, 6, enemy)
        {
            moves.push(Move::new((row, col), (back_rank, 6)));
        }

        let queenside_right = match color {
            Color::White => self.castling_rights.white_queenside,
            Color::Black => self.castling_rights.black_queenside,
        };
        if queenside_right
            && self.squares[back_rank][1].is_none()
            && self.squares[back_rank][2].is_none()
            && self.squares[back_rank][3].is_none()
            && rook_at(0)
            && !self.is_square_attacked_by(back_rank, 3, enemy)
            && !self.is_square_attacked_by(back_rank, 2, enemy)
        {
            moves.push(Move::new((row, col), (back_rank, 2)));
        }
    }

    /// All legal moves for `color`: pseudo-legal moves that do not leave or
    /// place that side's own king in check.
    pub fn generate_legal_moves(&self, color: Color) -> Vec<Move> {
        self.generate_moves(color)
            .into_iter()
            .filter(|m| {
                let mut next = self.clone();
                next.apply_move_unchecked(m);
                !next.is_in_check(color)
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Move application
    // ------------------------------------------------------------------

    /// Apply a move that is already known to be legal (i.e. it came from
    /// `generate_legal_moves` on this exact position). Returns the captured
    /// piece type, if any.
    pub(crate) fn apply_move_unchecked(&mut self, m: &Move) -> Option<PieceType> {
        let (fr, fc) = m.from;
        let (tr, tc) = m.to;

        let piece = match self.squares[fr][fc] {
            Some(p) => p,
            None => return None,
        };

        let is_pawn_move = piece.piece_type == PieceType::Pawn;
        let mut captured = self.squares[tr][tc].map(|p| p.piece_type);

        // En passant: the captured pawn sits beside the destination, on the
        // capturing pawn's starting row.
        if is_pawn_move && Some((tr, tc)) == self.en_passant_target {
            captured = self.squares[fr][tc].map(|p| p.piece_type);
            self.squares[fr][tc] = None;
        }

        self.squares[tr][tc] = Some(piece);
        self.squares[fr][fc] = None;

        if let Some(promo) = m.promotion {
            self.squares[tr][tc] = Some(Piece::new(promo, piece.color));
        }

        // Castling is encoded as a two-square king move; bring the rook over.
        if piece.piece_type == PieceType::King {
            let col_diff = tc as i32 - fc as i32;
            if col_diff == 2 {
                self.squares[fr][5] = self.squares[fr][7];
                self.squares[fr][7] = None;
            } else if col_diff == -2 {
                self.squares[fr][3] = self.squares[fr][0];
                self.squares[fr][0] = None;
            }
        }

        // Castling rights: king movement forfeits both sides, rook movement
        // its own side, and a rook captured on its home square the
        // opponent's corresponding side.
        if piece.piece_type == PieceType::King {
            match piece.color {
                Color::White => {
                    self.castling_rights.white_kingside = false;
                    self.castling_rights.white_queenside = false;
                }
                Color::Black => {
                    self.castling_rights.black_kingside = false;
                    self.castling_rights.black_queenside = false;
                }
            }
        }
        if piece.piece_type == PieceType::Rook {
            match (piece.color, fr, fc) {
                (Color::White, 0, 0) => self.castling_rights.white_queenside = false,
                (Color::White, 0, 7) => self.castling_rights.white_kingside = false,
                (Color::Black, 7, 0) => self.castling_rights.black_queenside = false,
                (Color::Black, 7, 7) => self.castling_rights.black_kingside = false,
                _ => {}
            }
        }
        match (tr, tc) {
            (0, 0) => self.castling_rights.white_queenside = false,
            (0, 7) => self.castling_rights.white_kingside = false,
            (7, 0) => self.castling_rights.black_queenside = false,
            (7, 7) => self.castling_rights.black_kingside = false,
            _ => {}
        }

        // En passant target: set on a double push, cleared otherwise.
        if is_pawn_move && (fr as i32 - tr as i32).abs() == 2 {
            self.en_passant_target = Some(((fr + tr) / 2, fc));
        } else {
            self.en_passant_target = None;
        }

        if is_pawn_move || captured.is_some() {
            self.halfmove_clock = 0;
        } else {
            self.halfmove_clock += 1;
        }

        if self.current_turn == Color::Black {
            self.fullmove_number += 1;
        }
        self.current_turn = self.current_turn.opposite();
        self.record_position();

        captured
    }

    /// Validate and apply a move for the side to move.
    ///
    /// On any rule violation the board is left exactly as it was and a
    /// `MoveError` describes the rejection.
    pub fn make_move(&mut self, m: &Move) -> Result<MoveOutcome, MoveError> {
        let (fr, fc) = m.from;
        if fr >= 8 || fc >= 8 || m.to.0 >= 8 || m.to.1 >= 8 {
            return Err(MoveError::IllegalMove);
        }

        let piece = self.squares[fr][fc].ok_or(MoveError::NoPieceAtSource)?;
        if piece.color != self.current_turn {
            return Err(MoveError::NotYourPiece);
        }

        let promo_row = match piece.color {
            Color::White => 7,
            Color::Black => 0,
        };
        let is_promotion_move = piece.piece_type == PieceType::Pawn && m.to.0 == promo_row;
        if is_promotion_move && m.promotion.is_none() {
            return Err(MoveError::PromotionExpected);
        }
        if !is_promotion_move && m.promotion.is_some() {
            return Err(MoveError::UnexpectedPromotion);
        }

        if !self.generate_legal_moves(self.current_turn).contains(m) {
            return Err(MoveError::IllegalMove);
        }

        let captured = self.apply_move_unchecked(m);
        Ok(MoveOutcome {
            captured,
            status: self.game_status(),
        })
    }

    // ------------------------------------------------------------------
    // Status detection
    // ------------------------------------------------------------------

    fn count_repetitions(&self) -> usize {
        let current = zobrist::key(self);
        self.position_history
            .iter()
            .filter(|&&k| k == current)
            .count()
    }

    /// K vs K, K+minor vs K, or same-colored single bishops.
    fn has_insufficient_material(&self) -> bool {
        let mut white = Vec::new();
        let mut black = Vec::new();
        for row in 0..8 {
            for col in 0..8 {
                if let Some(p) = self.squares[row][col] {
                    if p.piece_type == PieceType::King {
                        continue;
                    }
                    match p.color {
                        Color::White => white.push((p.piece_type, row, col)),
                        Color::Black => black.push((p.piece_type, row, col)),
                    }
                }
            }
        }

        let is_minor = |pt: PieceType| pt == PieceType::Bishop || pt == PieceType::Knight;

        match (white.as_slice(), black.as_slice()) {
            ([], []) => true,
            ([(pt, _, _)], []) | ([], [(pt, _, _)]) => is_minor(*pt),
            ([(PieceType::Bishop, wr, wc)], [(PieceType::Bishop, br, bc)]) => {
                // Same-colored squares: opposite-colored bishops can still
                // construct mating nets, same-colored never can.
                (wr + wc) % 2 == (br + bc) % 2
            }
            _ => false,
        }
    }

    /// Status of the position for the side to move, in rule precedence:
    /// mate/stalemate first, then the draw rules, then check.
    pub fn game_status(&self) -> GameStatus {
        let legal = self.generate_legal_moves(self.current_turn);
        let in_check = self.is_in_check(self.current_turn);

        if legal.is_empty() {
            return if in_check {
                match self.current_turn {
                    Color::White => GameStatus::BlackWins,
                    Color::Black => GameStatus::WhiteWins,
                }
            } else {
                GameStatus::DrawStalemate
            };
        }

        if self.has_insufficient_material() {
            return GameStatus::DrawInsufficientMaterial;
        }
        if self.halfmove_clock >= 100 {
            return GameStatus::DrawFiftyMoveRule;
        }
        if self.count_repetitions() >= 3 {
            return GameStatus::DrawRepetition;
        }

        if in_check {
            GameStatus::Check
        } else {
            GameStatus::Ongoing
        }
    }

    /// Signed material balance in pawn units, positive for White.
    pub fn material_balance(&self) -> f64 {
        let mut balance = 0.0;
        for row in 0..8 {
            for col in 0..8 {
                if let Some(p) = self.squares[row][col] {
                    let v = p.piece_type.value();
                    match p.color {
                        Color::White => balance += v,
                        Color::Black => balance -= v,
                    }
                }
            }
        }
        balance
    }
}

impl fmt::Display for Board {
    /// Ranks from Black's side down, FEN letters for pieces, dots for
    /// empty squares.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in (0..8).rev() {
            write!(f, "{} ", row + 1)?;
            for col in 0..8 {
                match self.squares[row][col] {
                    Some(p) => write!(f, "{} ", p.to_fen_char())?,
                    None => write!(f, ". ")?,
                }
            }
            writeln!(f)?;
        }
        write!(f, "  a b c d e f g h")
    }
}

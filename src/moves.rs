use serde::{Deserialize, Serialize};

use crate::piece::PieceType;

/// A move between two squares, given as (rank row, file col) pairs with
/// row 0 = White's first rank and col 0 = the a-file. `promotion` is set
/// exactly when a pawn reaches the last rank.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct Move {
    pub from: (usize, usize),
    pub to: (usize, usize),
    pub promotion: Option<PieceType>,
}

impl Move {
    pub fn new(from: (usize, usize), to: (usize, usize)) -> Self {
        Move {
            from,
            to,
            promotion: None,
        }
    }

    /// Convert to UCI notation, e.g. "e2e4", "a7a8q".
    pub fn to_uci(&self) -> String {
        let fc = (b'a' + self.from.1 as u8) as char;
        let fr = (b'1' + self.from.0 as u8) as char;
        let tc = (b'a' + self.to.1 as u8) as char;
        let tr = (b'1' + self.to.0 as u8) as char;
        let promo = match self.promotion {
            Some(PieceType::Queen) => "q",
            Some(PieceType::Rook) => "r",
            Some(PieceType::Bishop) => "b",
            Some(PieceType::Knight) => "n",
            _ => "",
        };
        format!("{fc}{fr}{tc}{tr}{promo}")
    }

    /// Parse from UCI notation. Both squares must be on the board and the
    /// optional fifth character must be one of q/r/b/n.
    pub fn from_uci(s: &str) -> Option<Move> {
        let bytes = s.as_bytes();
        if bytes.len() < 4 || bytes.len() > 5 {
            return None;
        }
        let fc = bytes[0].wrapping_sub(b'a') as usize;
        let fr = bytes[1].wrapping_sub(b'1') as usize;
        let tc = bytes[2].wrapping_sub(b'a') as usize;
        let tr = bytes[3].wrapping_sub(b'1') as usize;
        if fc >= 8 || fr >= 8 || tc >= 8 || tr >= 8 {
            return None;
        }
        let promotion = if bytes.len() == 5 {
            match bytes[4] {
                b'q' => Some(PieceType::Queen),
                b'r' => Some(PieceType::Rook),
                b'b' => Some(PieceType::Bishop),
                b'n' => Some(PieceType::Knight),
                _ => return None,
            }
        } else {
            None
        };
        Some(Move {
            from: (fr, fc),
            to: (tr, tc),
            promotion,
        })
    }
}

//! Forsyth–Edwards Notation: the six-field ASCII interchange format for
//! positions (placement / active color / castling / en passant / halfmove /
//! fullmove).

use thiserror::Error;

use crate::board::{Board, CastlingRights};
use crate::piece::{Color, Piece};

#[derive(Error, Clone, PartialEq, Eq, Debug)]
pub enum FenError {
    #[error("expected 6 fields, found {0}")]
    WrongFieldCount(usize),
    #[error("expected 8 ranks, found {0}")]
    WrongRankCount(usize),
    #[error("rank {0} does not describe exactly 8 files")]
    BadRankWidth(usize),
    #[error("unknown piece character {0:?}")]
    UnknownPiece(char),
    #[error("active color must be 'w' or 'b', found {0:?}")]
    BadActiveColor(String),
    #[error("malformed castling field {0:?}")]
    BadCastling(String),
    #[error("malformed en-passant field {0:?}")]
    BadEnPassant(String),
    #[error("malformed halfmove clock {0:?}")]
    BadHalfmoveClock(String),
    #[error("malformed fullmove number {0:?}")]
    BadFullmoveNumber(String),
}

impl Board {
    /// Emit the position as a six-field FEN string. The standard starting
    /// position emits
    /// `rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1`.
    pub fn to_fen(&self) -> String {
        let mut fen = String::new();

        for row in (0..8).rev() {
            let mut empty = 0;
            for col in 0..8 {
                match self.squares[row][col] {
                    None => empty += 1,
                    Some(piece) => {
                        if empty > 0 {
                            fen.push((b'0' + empty) as char);
                            empty = 0;
                        }
                        fen.push(piece.to_fen_char());
                    }
                }
            }
            if empty > 0 {
                fen.push((b'0' + empty) as char);
            }
            if row > 0 {
                fen.push('/');
            }
        }

        fen.push(' ');
        fen.push(match self.current_turn {
            Color::White => 'w',
            Color::Black => 'b',
        });

        fen.push(' ');
        let rights = &self.castling_rights;
        if !rights.white_kingside
            && !rights.white_queenside
            && !rights.black_kingside
            && !rights.black_queenside
        {
            fen.push('-');
        } else {
            if rights.white_kingside {
                fen.push('K');
            }
            if rights.white_queenside {
                fen.push('Q');
            }
            if rights.black_kingside {
                fen.push('k');
            }
            if rights.black_queenside {
                fen.push('q');
            }
        }

        fen.push(' ');
        match self.en_passant_target {
            Some((row, col)) => {
                fen.push((b'a' + col as u8) as char);
                fen.push((b'1' + row as u8) as char);
            }
            None => fen.push('-'),
        }

        fen.push(' ');
        fen.push_str(&self.halfmove_clock.to_string());
        fen.push(' ');
        fen.push_str(&self.fullmove_number.to_string());

        fen
    }

    /// Parse a six-field FEN string.
    ///
    /// Every rank token must describe exactly 8 files. King-count validation
    /// is a separate concern (`validate_kings`); the parser accepts any
    /// placement so analysis positions can be loaded freely.
    pub fn from_fen(fen: &str) -> Result<Board, FenError> {
        let fields: Vec<&str> = fen.split_whitespace().collect();
        if fields.len() != 6 {
            return Err(FenError::WrongFieldCount(fields.len()));
        }

        let ranks: Vec<&str> = fields[0].split('/').collect();
        if ranks.len() != 8 {
            return Err(FenError::WrongRankCount(ranks.len()));
        }

        let mut board = Board::empty();
        for (rank_index, rank) in ranks.iter().enumerate() {
            let row = 7 - rank_index;
            let mut col = 0usize;
            for c in rank.chars() {
                if let Some(digit) = c.to_digit(10) {
                    if digit == 0 || digit > 8 {
                        return Err(FenError::BadRankWidth(row + 1));
                    }
                    col += digit as usize;
                } else {
                    let piece = Piece::from_fen_char(c).ok_or(FenError::UnknownPiece(c))?;
                    if col >= 8 {
                        return Err(FenError::BadRankWidth(row + 1));
                    }
                    board.squares[row][col] = Some(piece);
                    col += 1;
                }
                if col > 8 {
                    return Err(FenError::BadRankWidth(row + 1));
                }
            }
            if col != 8 {
                return Err(FenError::BadRankWidth(row + 1));
            }
        }

        board.current_turn = match fields[1] {
            "w" => Color::White,
            "b" => Color::Black,
            other => return Err(FenError::BadActiveColor(other.to_string())),
        };

        board.castling_rights = if fields[2] == "-" {
            CastlingRights::none()
        } else {
            let mut rights = CastlingRights::none();
            for c in fields[2].chars() {
                match c {
                    'K' => rights.white_kingside = true,
                    'Q' => rights.white_queenside = true,
                    'k' => rights.black_kingside = true,
                    'q' => rights.black_queenside = true,
                    _ => return Err(FenError::BadCastling(fields[2].to_string())),
                }
            }
            rights
        };

        board.en_passant_target = if fields[3] == "-" {
            None
        } else {
            let bytes = fields[3].as_bytes();
            if bytes.len() != 2 {
                return Err(FenError::BadEnPassant(fields[3].to_string()));
            }
            let col = bytes[0].wrapping_sub(b'a') as usize;
            let row = bytes[1].wrapping_sub(b'1') as usize;
            if col >= 8 || row >= 8 {
                return Err(FenError::BadEnPassant(fields[3].to_string()));
            }
            Some((row, col))
        };

        board.halfmove_clock = fields[4]
            .parse()
            .map_err(|_| FenError::BadHalfmoveClock(fields[4].to_string()))?;
        board.fullmove_number = fields[5]
            .parse()
            .map_err(|_| FenError::BadFullmoveNumber(fields[5].to_string()))?;
        if board.fullmove_number == 0 {
            return Err(FenError::BadFullmoveNumber(fields[5].to_string()));
        }

        board.record_position();
        Ok(board)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moves::Move;
    use pretty_assertions::assert_eq;

    const START_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

    #[test]
    fn starting_position_emits_canonical_fen() {
        assert_eq!(Board::new().to_fen(), START_FEN);
    }

    #[test]
    fn fen_round_trip_from_start() {
        let board = Board::from_fen(START_FEN).unwrap();
        assert_eq!(board.to_fen(), START_FEN);
        assert!(board.validate_kings());
    }

    #[test]
    fn fen_round_trip_along_a_game() {
        let mut board = Board::new();
        for uci in ["e2e4", "c7c5", "g1f3", "d7d6", "f1b5", "c8d7", "e1g1"] {
            board.make_move(&Move::from_uci(uci).unwrap()).unwrap();
            let reparsed = Board::from_fen(&board.to_fen()).unwrap();
            assert_eq!(reparsed.squares, board.squares);
            assert_eq!(reparsed.current_turn, board.current_turn);
            assert_eq!(reparsed.castling_rights, board.castling_rights);
            assert_eq!(reparsed.en_passant_target, board.en_passant_target);
            assert_eq!(reparsed.halfmove_clock, board.halfmove_clock);
            assert_eq!(reparsed.fullmove_number, board.fullmove_number);
            assert_eq!(reparsed.to_fen(), board.to_fen());
        }
    }

    #[test]
    fn en_passant_field_round_trips() {
        let mut board = Board::new();
        board.make_move(&Move::from_uci("e2e4").unwrap()).unwrap();
        let fen = board.to_fen();
        assert!(fen.contains(" e3 "), "fen was {fen}");
        let reparsed = Board::from_fen(&fen).unwrap();
        assert_eq!(reparsed.en_passant_target, Some((2, 4)));
    }

    #[test]
    fn rejects_wrong_field_count() {
        assert_eq!(
            Board::from_fen("8/8/8/8/8/8/8/8 w - -"),
            Err(FenError::WrongFieldCount(4))
        );
    }

    #[test]
    fn rejects_rank_not_summing_to_eight() {
        let short = "rnbqkbnr/ppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";
        assert_eq!(Board::from_fen(short), Err(FenError::BadRankWidth(7)));

        let long = "rnbqkbnr/ppppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";
        assert_eq!(Board::from_fen(long), Err(FenError::BadRankWidth(7)));

        let overflow_digit = "rnbqkbnr/pppppppp/9/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";
        assert_eq!(Board::from_fen(overflow_digit), Err(FenError::BadRankWidth(6)));
    }

    #[test]
    fn rejects_unknown_piece_char() {
        let bad = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNX w KQkq - 0 1";
        assert_eq!(Board::from_fen(bad), Err(FenError::UnknownPiece('X')));
    }

    #[test]
    fn rejects_bad_trailing_fields() {
        let base = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR";
        assert!(matches!(
            Board::from_fen(&format!("{base} x KQkq - 0 1")),
            Err(FenError::BadActiveColor(_))
        ));
        assert!(matches!(
            Board::from_fen(&format!("{base} w KQxq - 0 1")),
            Err(FenError::BadCastling(_))
        ));
        assert!(matches!(
            Board::from_fen(&format!("{base} w KQkq e9 0 1")),
            Err(FenError::BadEnPassant(_))
        ));
        assert!(matches!(
            Board::from_fen(&format!("{base} w KQkq - x 1")),
            Err(FenError::BadHalfmoveClock(_))
        ));
        assert!(matches!(
            Board::from_fen(&format!("{base} w KQkq - 0 0")),
            Err(FenError::BadFullmoveNumber(_))
        ));
    }

    #[test]
    fn parsed_positions_are_playable() {
        // A middlegame position: parser output must generate moves and
        // detect status like a position reached by play.
        let fen = "r1bqkbnr/pppp1ppp/2n5/4p3/2B1P3/5N2/PPPP1PPP/RNBQK2R b KQkq - 3 3";
        let board = Board::from_fen(fen).unwrap();
        assert!(board.validate_kings());
        assert!(!board.generate_legal_moves(board.current_turn).is_empty());
    }

    #[test]
    fn missing_kings_flagged_by_validator_not_parser() {
        let fen = "8/8/8/8/8/8/8/8 w - - 0 1";
        let board = Board::from_fen(fen).expect("parser accepts empty board");
        assert!(!board.validate_kings());
    }
}

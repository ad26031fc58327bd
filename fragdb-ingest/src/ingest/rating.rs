//! Pairwise Elo-style rating updates applied to a round's roster. The
//! engine is handed ratings and kill counts and nothing else, so it can be
//! exercised in isolation.

use std::cmp::Ordering;

pub const K_FACTOR: f64 = 32.0;
pub const INITIAL_RATING: f64 = 1000.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contender {
    pub rating: f64,
    pub kills: i32,
}

/// Expected score of a player rated `rating` against `opponent`.
pub fn expected_score(rating: f64, opponent: f64) -> f64 {
    1.0 / (1.0 + 10f64.powf((opponent - rating) / 400.0))
}

/// Updates every contender's rating in place. Each pair with unequal kill
/// counts scores as a win for the higher count; ties leave both untouched.
pub fn rate_round(roster: &mut [Contender]) {
    for i in 0..roster.len() {
        for j in (i + 1)..roster.len() {
            let (winner, loser) = match roster[i].kills.cmp(&roster[j].kills) {
                Ordering::Greater => (i, j),
                Ordering::Less => (j, i),
                Ordering::Equal => continue,
            };
            let expected_win = expected_score(roster[winner].rating, roster[loser].rating);
            let expected_loss = expected_score(roster[loser].rating, roster[winner].rating);
            roster[winner].rating += K_FACTOR * (1.0 - expected_win);
            roster[loser].rating -= K_FACTOR * expected_loss;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_scores_of_a_pair_sum_to_one() {
        let a = 1200.0;
        let b = 870.0;
        assert!((expected_score(a, b) + expected_score(b, a) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn evenly_rated_pair_transfers_half_the_k_factor() {
        let mut roster = [
            Contender { rating: 1000.0, kills: 2 },
            Contender { rating: 1000.0, kills: 0 },
        ];
        rate_round(&mut roster);
        assert!((roster[0].rating - 1016.0).abs() < 1e-9);
        assert!((roster[1].rating - 984.0).abs() < 1e-9);
    }

    #[test]
    fn tied_kill_counts_change_nothing() {
        let mut roster = [
            Contender { rating: 1100.0, kills: 1 },
            Contender { rating: 900.0, kills: 1 },
        ];
        rate_round(&mut roster);
        assert_eq!(roster[0].rating, 1100.0);
        assert_eq!(roster[1].rating, 900.0);
    }

    #[test]
    fn underdog_win_moves_more_points() {
        let mut underdog_wins = [
            Contender { rating: 900.0, kills: 3 },
            Contender { rating: 1100.0, kills: 1 },
        ];
        rate_round(&mut underdog_wins);
        let underdog_gain = underdog_wins[0].rating - 900.0;

        let mut favorite_wins = [
            Contender { rating: 1100.0, kills: 3 },
            Contender { rating: 900.0, kills: 1 },
        ];
        rate_round(&mut favorite_wins);
        let favorite_gain = favorite_wins[0].rating - 1100.0;

        assert!(underdog_gain > favorite_gain);
        assert!(favorite_gain > 0.0);
    }

    #[test]
    fn each_pair_exchange_is_zero_sum() {
        let mut roster = [
            Contender { rating: 1040.0, kills: 4 },
            Contender { rating: 980.0, kills: 2 },
            Contender { rating: 1010.0, kills: 2 },
            Contender { rating: 995.0, kills: 0 },
        ];
        let before: f64 = roster.iter().map(|c| c.rating).sum();
        rate_round(&mut roster);
        let after: f64 = roster.iter().map(|c| c.rating).sum();
        assert!((before - after).abs() < 1e-9);
    }
}

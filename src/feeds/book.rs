use std::collections::BTreeMap;

/// Venue depth, keyed by price in ticks so float prices from the wire
/// collapse onto exact levels.
#[derive(Debug)]
pub struct VenueBook {
    tick_size: f64,
    // price_ticks -> size (aggregate); highest bid / lowest ask are best
    bids: BTreeMap<i64, f64>,
    asks: BTreeMap<i64, f64>,
}

impl VenueBook {
    pub fn new(tick_size: f64) -> Self {
        Self {
            tick_size,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
        }
    }

    fn ticks(&self, price: f64) -> i64 {
        (price / self.tick_size).round() as i64
    }

    fn price(&self, ticks: i64) -> f64 {
        ticks as f64 * self.tick_size
    }

    /// Replace the whole book with a fresh snapshot.
    pub fn apply_snapshot(&mut self, bids: &[(f64, f64)], asks: &[(f64, f64)]) {
        self.bids.clear();
        self.asks.clear();
        for &(p, s) in bids {
            self.bids.insert(self.ticks(p), s);
        }
        for &(p, s) in asks {
            self.asks.insert(self.ticks(p), s);
        }
    }

    /// Incremental update; a zero size deletes the level.
    pub fn apply_delta(&mut self, bids: &[(f64, f64)], asks: &[(f64, f64)]) {
        for &(p, s) in bids {
            let t = self.ticks(p);
            if s == 0.0 {
                self.bids.remove(&t);
            } else {
                self.bids.insert(t, s);
            }
        }
        for &(p, s) in asks {
            let t = self.ticks(p);
            if s == 0.0 {
                self.asks.remove(&t);
            } else {
                self.asks.insert(t, s);
            }
        }
    }

    pub fn bbo(&self) -> (Option<(f64, f64)>, Option<(f64, f64)>) {
        let best_bid = self.bids.iter().next_back().map(|(t, s)| (self.price(*t), *s));
        let best_ask = self.asks.iter().next().map(|(t, s)| (self.price(*t), *s));
        (best_bid, best_ask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_and_bbo() {
        let mut book = VenueBook::new(0.1);
        book.apply_snapshot(
            &[(99.9, 2.0), (99.8, 1.0)],
            &[(100.1, 3.0), (100.2, 1.0)],
        );
        let (bid, ask) = book.bbo();
        assert_eq!(bid, Some((99.9, 2.0)));
        assert_eq!(ask, Some((100.1, 3.0)));
    }

    #[test]
    fn test_delta_updates_and_removes() {
        let mut book = VenueBook::new(0.1);
        book.apply_snapshot(&[(99.9, 2.0)], &[(100.1, 3.0)]);
        book.apply_delta(&[(99.9, 0.0), (99.8, 5.0)], &[(100.1, 1.5)]);
        let (bid, ask) = book.bbo();
        assert_eq!(bid, Some((99.8, 5.0)));
        assert_eq!(ask, Some((100.1, 1.5)));
    }

    #[test]
    fn test_empty_book() {
        let book = VenueBook::new(0.1);
        assert_eq!(book.bbo(), (None, None));
    }
}

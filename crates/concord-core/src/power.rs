use concord_protocol::PowerArea;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PowerError {
    #[error("not enough power in area 3 (need {need}, have {have})")]
    Spend { need: u32, have: u32 },
    #[error("not enough tokens to move (need {need}, have {have})")]
    Tokens { need: u32, have: u32 },
}

/// The five power areas of one player. Tokens charge 1 -> 2 -> 3, are spent
/// 3 -> 1, burn out of area 2, and sit in the gaia area while a gaiaformer
/// is deployed. The Taklons brainstone is tracked separately and is worth 3
/// power when spent.
///
/// Conservation: area1 + area2 + area3 + gaia + discarded always equals the
/// tracked total (starting tokens plus tokens gained); the brainstone is
/// outside that count.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerBowls {
    area1: u32,
    area2: u32,
    area3: u32,
    gaia: u32,
    discarded: u32,
    #[serde(default)]
    brainstone: Option<PowerArea>,
    total: u32,
}

impl PowerBowls {
    pub fn new(area1: u32, area2: u32, brainstone: bool) -> Self {
        Self {
            area1,
            area2,
            area3: 0,
            gaia: 0,
            discarded: 0,
            brainstone: brainstone.then_some(PowerArea::Area1),
            total: area1 + area2,
        }
    }

    pub fn area1(&self) -> u32 {
        self.area1
    }

    pub fn area2(&self) -> u32 {
        self.area2
    }

    pub fn area3(&self) -> u32 {
        self.area3
    }

    pub fn gaia(&self) -> u32 {
        self.gaia
    }

    pub fn discarded(&self) -> u32 {
        self.discarded
    }

    pub fn brainstone(&self) -> Option<PowerArea> {
        self.brainstone
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn conserved(&self) -> bool {
        self.area1 + self.area2 + self.area3 + self.gaia + self.discarded == self.total
    }

    /// Charge steps this player could still absorb.
    pub fn chargeable(&self) -> u32 {
        let mut steps = 2 * self.area1 + self.area2;
        match self.brainstone {
            Some(PowerArea::Area1) => steps += 2,
            Some(PowerArea::Area2) => steps += 1,
            _ => {}
        }
        steps
    }

    /// Charge up to `steps`, regular tokens first, the brainstone with any
    /// remainder. Returns the number of steps actually used.
    pub fn charge(&mut self, steps: u32) -> u32 {
        let mut left = steps;

        let from1 = left.min(self.area1);
        self.area1 -= from1;
        self.area2 += from1;
        left -= from1;

        let from2 = left.min(self.area2);
        self.area2 -= from2;
        self.area3 += from2;
        left -= from2;

        if left > 0 && self.brainstone == Some(PowerArea::Area1) {
            self.brainstone = Some(PowerArea::Area2);
            left -= 1;
        }
        if left > 0 && self.brainstone == Some(PowerArea::Area2) {
            self.brainstone = Some(PowerArea::Area3);
            left -= 1;
        }
        steps - left
    }

    /// Tokens that could be burned (two area-2 tokens per burn).
    pub fn max_burn(&self) -> u32 {
        self.area2 / 2
    }

    /// Burn `n`: for each burn, one area-2 token advances to area 3 and one
    /// leaves play (or moves to the gaia area for Itars).
    pub fn burn(&mut self, n: u32, burned_to_gaia: bool) -> Result<(), PowerError> {
        if self.area2 < 2 * n {
            return Err(PowerError::Tokens {
                need: 2 * n,
                have: self.area2,
            });
        }
        self.area2 -= 2 * n;
        self.area3 += n;
        if burned_to_gaia {
            self.gaia += n;
        } else {
            self.discarded += n;
        }
        Ok(())
    }

    /// Power this player can spend right now. With `doubled` (Nevlas
    /// planetary institute) each area-3 token is worth 2.
    pub fn spendable(&self, doubled: bool) -> u32 {
        let worth = if doubled { 2 } else { 1 };
        let mut power = self.area3 * worth;
        if self.brainstone == Some(PowerArea::Area3) {
            power += 3;
        }
        power
    }

    /// Spend `amount` power from area 3. `use_brainstone` pays 3 of it with
    /// the brainstone (which must sit in area 3); excess value is wasted,
    /// as is the odd remainder when doubled.
    pub fn spend(
        &mut self,
        amount: u32,
        doubled: bool,
        use_brainstone: bool,
    ) -> Result<(), PowerError> {
        let mut need = amount;
        if use_brainstone {
            if self.brainstone != Some(PowerArea::Area3) {
                return Err(PowerError::Spend {
                    need: amount,
                    have: self.spendable(doubled),
                });
            }
            self.brainstone = Some(PowerArea::Area1);
            need = need.saturating_sub(3);
        }
        let worth = if doubled { 2 } else { 1 };
        let tokens = need.div_ceil(worth);
        if tokens > self.area3 {
            return Err(PowerError::Spend {
                need: amount,
                have: self.spendable(doubled),
            });
        }
        self.area3 -= tokens;
        self.area1 += tokens;
        Ok(())
    }

    /// Spend exactly `n` area-3 tokens regardless of their power worth
    /// (Nevlas token-to-knowledge conversion).
    pub fn spend_tokens(&mut self, n: u32) -> Result<(), PowerError> {
        if self.area3 < n {
            return Err(PowerError::Tokens {
                need: n,
                have: self.area3,
            });
        }
        self.area3 -= n;
        self.area1 += n;
        Ok(())
    }

    /// New tokens enter area 1.
    pub fn gain(&mut self, n: u32) {
        self.area1 += n;
        self.total += n;
    }

    /// Tokens still in the bowls (satellite budget and gaiaformer fuel).
    pub fn tokens_in_bowls(&self) -> u32 {
        self.area1 + self.area2 + self.area3
    }

    /// Remove `n` tokens from the bowls permanently, cheapest area first
    /// (satellites).
    pub fn discard_any(&mut self, n: u32) -> Result<(), PowerError> {
        self.take_cheapest(n)?;
        self.discarded += n;
        Ok(())
    }

    /// Move `n` tokens to the gaia area, cheapest area first (gaiaformer
    /// deployment).
    pub fn to_gaia(&mut self, n: u32) -> Result<(), PowerError> {
        self.take_cheapest(n)?;
        self.gaia += n;
        Ok(())
    }

    /// Return every gaia-area token to `to` (area 1, or area 2 for Terrans).
    /// Returns how many tokens came back.
    pub fn gaia_return(&mut self, to: PowerArea) -> u32 {
        let n = self.gaia;
        self.gaia = 0;
        match to {
            PowerArea::Area2 => self.area2 += n,
            _ => self.area1 += n,
        }
        if self.brainstone == Some(PowerArea::Gaia) {
            self.brainstone = Some(PowerArea::Area1);
        }
        n
    }

    /// Remove 4 gaia-area tokens (Itars tech-tile conversion).
    pub fn consume_gaia(&mut self, n: u32) -> Result<(), PowerError> {
        if self.gaia < n {
            return Err(PowerError::Tokens {
                need: n,
                have: self.gaia,
            });
        }
        self.gaia -= n;
        self.discarded += n;
        Ok(())
    }

    pub fn move_brainstone(&mut self, to: PowerArea) {
        if self.brainstone.is_some() {
            self.brainstone = Some(to);
        }
    }

    fn take_cheapest(&mut self, n: u32) -> Result<(), PowerError> {
        if self.tokens_in_bowls() < n {
            return Err(PowerError::Tokens {
                need: n,
                have: self.tokens_in_bowls(),
            });
        }
        let mut left = n;
        for area in [&mut self.area1, &mut self.area2, &mut self.area3] {
            let taken = left.min(*area);
            *area -= taken;
            left -= taken;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charging_walks_tokens_up() {
        let mut bowls = PowerBowls::new(2, 4, false);
        assert_eq!(bowls.chargeable(), 2 * 2 + 4);
        assert_eq!(bowls.charge(3), 3);
        assert_eq!((bowls.area1(), bowls.area2(), bowls.area3()), (0, 5, 1));
        assert_eq!(bowls.charge(10), 5);
        assert_eq!(bowls.area3(), 6);
        assert!(bowls.conserved());
    }

    #[test]
    fn brainstone_charges_after_regular_tokens() {
        let mut bowls = PowerBowls::new(0, 0, true);
        assert_eq!(bowls.chargeable(), 2);
        assert_eq!(bowls.charge(1), 1);
        assert_eq!(bowls.brainstone(), Some(PowerArea::Area2));
        assert_eq!(bowls.charge(1), 1);
        assert_eq!(bowls.brainstone(), Some(PowerArea::Area3));
        assert_eq!(bowls.spendable(false), 3);
    }

    #[test]
    fn burning_discards_one_per_step() {
        let mut bowls = PowerBowls::new(0, 6, false);
        assert_eq!(bowls.max_burn(), 3);
        bowls.burn(2, false).unwrap();
        assert_eq!((bowls.area2(), bowls.area3(), bowls.discarded()), (2, 2, 2));
        assert!(bowls.conserved());
        assert_eq!(
            bowls.burn(2, false),
            Err(PowerError::Tokens { need: 4, have: 2 })
        );
    }

    #[test]
    fn itars_burn_feeds_the_gaia_area() {
        let mut bowls = PowerBowls::new(0, 4, false);
        bowls.burn(2, true).unwrap();
        assert_eq!(bowls.gaia(), 2);
        assert_eq!(bowls.discarded(), 0);
        assert!(bowls.conserved());
    }

    #[test]
    fn spending_returns_tokens_to_area_one() {
        let mut bowls = PowerBowls::new(0, 0, false);
        bowls.gain(4);
        bowls.charge(8);
        assert_eq!(bowls.area3(), 4);
        bowls.spend(3, false, false).unwrap();
        assert_eq!((bowls.area1(), bowls.area3()), (3, 1));
        assert!(bowls.spend(2, false, false).is_err());
        assert!(bowls.conserved());
    }

    #[test]
    fn doubled_spending_rounds_up() {
        let mut bowls = PowerBowls::new(0, 0, false);
        bowls.gain(3);
        bowls.charge(6);
        // 5 power from 3 doubled tokens: ceil(5/2) = 3 tokens.
        bowls.spend(5, true, false).unwrap();
        assert_eq!(bowls.area3(), 0);
        assert!(bowls.conserved());
    }

    #[test]
    fn brainstone_pays_three() {
        let mut bowls = PowerBowls::new(0, 1, true);
        bowls.charge(4);
        assert_eq!(bowls.brainstone(), Some(PowerArea::Area3));
        bowls.spend(4, false, true).unwrap();
        assert_eq!(bowls.brainstone(), Some(PowerArea::Area1));
        assert_eq!(bowls.area3(), 0);
        assert!(bowls.conserved());
    }

    #[test]
    fn gaia_round_trip_preserves_tokens() {
        let mut bowls = PowerBowls::new(3, 2, false);
        bowls.to_gaia(4).unwrap();
        assert_eq!(bowls.gaia(), 4);
        assert_eq!(bowls.gaia_return(PowerArea::Area2), 4);
        assert_eq!((bowls.area1(), bowls.area2()), (0, 5));
        assert!(bowls.conserved());
    }
}

use crate::{
    crawler::{Pacing, Timeouts},
    driver::{Control, Driver, DriverError},
    reporter::Reporter,
    types::Candidate,
};

/// Turns a loaded results page into candidates.
///
/// The result list renders rows lazily while it is scrolled, so the container
/// is scrolled until its height stops growing before any row is read.
pub struct LeadExtractor<'a> {
    pacing: &'a Pacing,
    timeouts: &'a Timeouts,
    max_scroll_rounds: u32,
}

impl<'a> LeadExtractor<'a> {
    pub fn new(pacing: &'a Pacing, timeouts: &'a Timeouts, max_scroll_rounds: u32) -> Self {
        LeadExtractor {
            pacing,
            timeouts,
            max_scroll_rounds,
        }
    }

    pub fn extract(
        &self,
        driver: &mut dyn Driver,
        reporter: &Reporter,
    ) -> Result<Vec<Candidate>, DriverError> {
        driver.wait_for(Control::ResultsContainer, self.timeouts.results_container)?;
        let height = self.load_all_rows(driver)?;

        let count = driver.row_count()?;
        debug!("{} rows on page, container height {}", count, height);

        let mut candidates = Vec::with_capacity(count);
        for index in 0..count {
            match driver.row_identity(index) {
                Ok(identity) => candidates.push(Candidate {
                    index,
                    name: identity.name,
                    profile_url: identity.profile_url,
                }),
                Err(e) => reporter.error(&format!(
                    "Error reading lead {} of {}: {}",
                    index + 1,
                    count,
                    e
                )),
            }
        }
        Ok(candidates)
    }

    /// Scrolls in thirds of the current height until a full round leaves the
    /// height unchanged, then goes back to the top. Returns the final height.
    fn load_all_rows(&self, driver: &mut dyn Driver) -> Result<u64, DriverError> {
        let mut last_height = driver.scroll_height()?;
        let mut rounds = 0;

        loop {
            for step in 1..=3u64 {
                driver.scroll_to(step * last_height / 3)?;
                self.pacing.scroll_step.pause();
            }
            self.pacing.scroll_settle.pause();
            rounds += 1;

            let height = driver.scroll_height()?;
            debug!("scroll round {}: height {} -> {}", rounds, last_height, height);
            if height == last_height {
                break;
            }
            last_height = height;

            if rounds >= self.max_scroll_rounds {
                warn!(
                    "results still growing after {} scroll rounds, reading what is loaded",
                    rounds
                );
                break;
            }
        }

        driver.scroll_to(0)?;
        self.pacing.after_scroll_reset.pause();
        Ok(last_height)
    }
}

use thiserror::Error;

use crate::{
    crawler::{Pace, Pacing, Timeouts},
    driver::{Control, Driver, DriverError},
    types::{Candidate, ConnectionStatus, Lead},
    utils::personalize_note,
};

#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("{0}")]
    Driver(#[from] DriverError),
    #[error("{0} is disabled")]
    Disabled(Control),
    #[error("note field did not show up ({0})")]
    NoNoteField(DriverError),
}

/// The invitation flow for a single candidate: actions menu, "Connect",
/// personalized note, "Send". Every step may fail; the caller skips the
/// candidate on any error.
pub struct ConnectionRequest<'a> {
    note_template: &'a str,
    pacing: &'a Pacing,
    timeouts: &'a Timeouts,
}

impl<'a> ConnectionRequest<'a> {
    pub fn new(note_template: &'a str, pacing: &'a Pacing, timeouts: &'a Timeouts) -> Self {
        ConnectionRequest {
            note_template,
            pacing,
            timeouts,
        }
    }

    pub fn attempt(
        &self,
        driver: &mut dyn Driver,
        candidate: &Candidate,
        search_url: &str,
    ) -> Result<Lead, ConnectError> {
        driver.click(Control::RowMenu(candidate.index))?;
        self.pacing.after_click.pause();

        self.activate(driver, Control::ConnectButton)?;
        self.pacing.after_click.pause();

        // already connected or out of network profiles have no note form
        driver
            .wait_for(Control::NoteField, self.timeouts.note_field)
            .map_err(ConnectError::NoNoteField)?;

        let note = personalize_note(self.note_template, &candidate.name);
        type_like_human(driver, Control::NoteField, &note, &self.pacing.typing)?;

        self.activate(driver, Control::SendButton)?;
        debug!("invitation sent to {}", candidate.profile_url);

        let search_url = match driver.current_url() {
            Ok(url) => url,
            Err(e) => {
                warn!("could not read location after send: {}", e);
                search_url.to_string()
            }
        };
        self.pacing.after_send.pause();

        Ok(Lead {
            name: candidate.name.clone(),
            profile_url: candidate.profile_url.clone(),
            connection_status: ConnectionStatus::Success,
            note_sent: note,
            search_url,
        })
    }

    fn activate(&self, driver: &mut dyn Driver, control: Control) -> Result<(), ConnectError> {
        driver.wait_for(control, self.timeouts.element)?;
        if !driver.is_enabled(control)? {
            return Err(ConnectError::Disabled(control));
        }
        driver.click(control)?;
        Ok(())
    }
}

/// Types `text` one character at a time with `pace` between keystrokes.
pub fn type_like_human(
    driver: &mut dyn Driver,
    control: Control,
    text: &str,
    pace: &Pace,
) -> Result<(), DriverError> {
    let mut buf = [0u8; 4];
    for c in text.chars() {
        driver.type_text(control, c.encode_utf8(&mut buf))?;
        pace.pause();
    }
    Ok(())
}

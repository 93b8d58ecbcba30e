use headless_chrome::{browser::default_executable, Browser, Element, LaunchOptions, Tab};
use serde_json::Value;
use std::{path::PathBuf, sync::Arc, time::Duration};
use sysinfo::{Pid, PidExt, ProcessExt, System, SystemExt};

use crate::driver::{Control, Driver, DriverError, DriverFactory, KillSwitch, RowIdentity};

#[derive(Debug, Clone)]
enum Locator {
    Css(String),
    XPath(String),
}

const LOGIN_EMAIL: &str = "#username";
const LOGIN_PASSWORD: &str = "#password";
// global search box, only rendered for signed in members
const AUTHENTICATED_MARKER: &str = ".search-global-typeahead__input";
const RESULTS_CONTAINER: &str = "#search-results-container";
const RESULT_ROWS: &str = "#search-results-container ol > li";
const LEAD_NAME: &str = r#"[data-view-name="search-results-lead-name"]"#;
const ROW_MENU: &str = r#"button[aria-label*="more actions"]"#;
// the button is only identifiable by its label
const CONNECT_BUTTON_XPATH: &str =
    "//button[normalize-space()='Connect' or contains(normalize-space(), 'Connect')]";
const NOTE_FIELD: &str = "#connect-cta-form__invitation";
const SEND_BUTTON: &str = ".connect-cta-form__send";
const NEXT_PAGE_XPATH: &str = "//button[@aria-label='Next']";

/// Where the engine's controls live in the search UI markup. Every field is a
/// css selector unless its name ends in `_xpath`.
#[derive(Debug, Clone)]
pub struct Selectors {
    pub login_email: String,
    pub login_password: String,
    pub authenticated_marker: String,
    pub results_container: String,
    pub result_rows: String,
    pub lead_name: String,
    pub row_menu: String,
    pub connect_button_xpath: String,
    pub note_field: String,
    pub send_button: String,
    pub next_page_xpath: String,
}

impl Default for Selectors {
    fn default() -> Self {
        Selectors {
            login_email: LOGIN_EMAIL.into(),
            login_password: LOGIN_PASSWORD.into(),
            authenticated_marker: AUTHENTICATED_MARKER.into(),
            results_container: RESULTS_CONTAINER.into(),
            result_rows: RESULT_ROWS.into(),
            lead_name: LEAD_NAME.into(),
            row_menu: ROW_MENU.into(),
            connect_button_xpath: CONNECT_BUTTON_XPATH.into(),
            note_field: NOTE_FIELD.into(),
            send_button: SEND_BUTTON.into(),
            next_page_xpath: NEXT_PAGE_XPATH.into(),
        }
    }
}

impl Selectors {
    fn locator(&self, control: Control) -> Option<Locator> {
        let l = match control {
            Control::LoginEmail => Locator::Css(self.login_email.clone()),
            Control::LoginPassword => Locator::Css(self.login_password.clone()),
            Control::AuthenticatedMarker => Locator::Css(self.authenticated_marker.clone()),
            Control::ResultsContainer => Locator::Css(self.results_container.clone()),
            Control::ConnectButton => Locator::XPath(self.connect_button_xpath.clone()),
            Control::NoteField => Locator::Css(self.note_field.clone()),
            Control::SendButton => Locator::Css(self.send_button.clone()),
            Control::NextPage => Locator::XPath(self.next_page_xpath.clone()),
            // rows are reached through scripts, see row_script
            Control::RowMenu(_) => return None,
        };
        Some(l)
    }
}

#[derive(Builder, Debug, Clone)]
#[builder(setter(into))]
pub struct BrowserOptions {
    // chrome binary, looked up on the system when unset
    #[builder(default)]
    path: Option<PathBuf>,
    #[builder(default = "true")]
    headless: bool,
    #[builder(default = "(1920, 1080)")]
    window_size: (u32, u32),
    // maximum time the browser will wait for an event before timing out
    #[builder(default = "Duration::from_secs(120)")]
    browser_timeout: Duration,
    // how long element lookups outside explicit waits may take
    #[builder(default = "Duration::from_secs(2)")]
    lookup_timeout: Duration,
    #[builder(default)]
    selectors: Selectors,
}

impl BrowserOptions {
    pub fn default_builder() -> BrowserOptionsBuilder {
        BrowserOptionsBuilder::default()
    }
}

/// Launches one Chrome per session.
pub struct ChromeLauncher {
    options: BrowserOptions,
}

impl ChromeLauncher {
    pub fn new(options: BrowserOptions) -> Self {
        ChromeLauncher { options }
    }
}

impl DriverFactory for ChromeLauncher {
    fn launch(&self) -> Result<Box<dyn Driver>, DriverError> {
        let controller = BrowserController::new(&self.options)?;
        Ok(Box::new(controller))
    }
}

pub struct BrowserController {
    browser: Browser,
    tab: Arc<Tab>,
    options: BrowserOptions,
}

impl BrowserController {
    pub fn new(options: &BrowserOptions) -> Result<Self, DriverError> {
        let init = |e: String| DriverError::Init(e);

        let path = match &options.path {
            Some(p) => p.clone(),
            None => default_executable().map_err(init)?,
        };
        let is_docker = std::env::var("IN_DOCKER").is_ok();
        let launch_options = LaunchOptions::default_builder()
            .path(Some(path))
            .headless(options.headless)
            .window_size(Some(options.window_size))
            .idle_browser_timeout(options.browser_timeout)
            // warning only do this if in docker env
            .sandbox(!is_docker)
            .build()
            .map_err(|e| init(e.to_string()))?;

        let browser = Browser::new(launch_options).map_err(|e| init(e.to_string()))?;
        let tab = browser
            .new_tab()
            .map_err(|e| init(format!("could not create new tab: {}", e)))?;
        tab.set_default_timeout(options.browser_timeout);

        debug!(
            "browser launched with pid {:?}, headless: {}",
            browser.get_process_id(),
            options.headless
        );

        Ok(BrowserController {
            browser,
            tab,
            options: options.clone(),
        })
    }

    fn element(&self, control: Control, timeout: Duration) -> Result<Element<'_>, DriverError> {
        let found = match self.options.selectors.locator(control) {
            Some(Locator::Css(selector)) => self
                .tab
                .wait_for_element_with_custom_timeout(&selector, timeout),
            Some(Locator::XPath(xpath)) => self
                .tab
                .wait_for_xpath_with_custom_timeout(&xpath, timeout),
            None => {
                return Err(DriverError::ElementNotFound(format!(
                    "{} has no selector",
                    control
                )))
            }
        };
        found.map_err(|e| DriverError::ElementNotFound(format!("{}: {}", control, e)))
    }

    fn evaluate(&self, script: &str) -> Result<Option<Value>, DriverError> {
        let result = self
            .tab
            .evaluate(script, false)
            .map_err(|e| DriverError::Script(e.to_string()))?;
        Ok(result.value)
    }

    fn container_script(&self, body: &str) -> String {
        format!(
            "(function() {{ const c = document.querySelector({}); if (!c) return null; {} }})()",
            js_string(&self.options.selectors.results_container),
            body
        )
    }

    fn row_script(&self, row: usize, body: &str) -> String {
        format!(
            "(function() {{ const row = document.querySelectorAll({})[{}]; if (!row) return null; {} }})()",
            js_string(&self.options.selectors.result_rows),
            row,
            body
        )
    }

    pub fn kill(&self) -> bool {
        match self.browser.get_process_id() {
            Some(pid) => kill_process(pid),
            None => false,
        }
    }
}

impl Driver for BrowserController {
    fn navigate(&mut self, url: &str) -> Result<(), DriverError> {
        let nav = |e: anyhow::Error| DriverError::Navigation(format!("{}: {}", url, e));

        if let Err(e) = self.tab.navigate_to(url) {
            error!("could not navigate to {} with error {}", url, e);
            self.tab.navigate_to(url).map_err(nav)?;
        }
        if let Err(e) = self.tab.wait_until_navigated() {
            // we wait one more timeout
            warn!("error waiting for navigation, retrying {}", e);
            self.tab.wait_until_navigated().map_err(nav)?;
        }
        Ok(())
    }

    fn current_url(&mut self) -> Result<String, DriverError> {
        Ok(self.tab.get_url())
    }

    fn wait_for(&mut self, control: Control, timeout: Duration) -> Result<(), DriverError> {
        if let Control::RowMenu(row) = control {
            return match self.row_count()? > row {
                true => Ok(()),
                false => Err(DriverError::ElementNotFound(control.to_string())),
            };
        }
        self.element(control, timeout).map(|_| ())
    }

    fn is_enabled(&mut self, control: Control) -> Result<bool, DriverError> {
        let el = self.element(control, self.options.lookup_timeout)?;
        let res = el
            .call_js_fn(
                "function() { return !this.disabled && this.getAttribute('aria-disabled') !== 'true'; }",
                vec![],
                false,
            )
            .map_err(|e| DriverError::Script(e.to_string()))?;
        Ok(res.value.and_then(|v| v.as_bool()).unwrap_or(false))
    }

    fn click(&mut self, control: Control) -> Result<(), DriverError> {
        if let Control::RowMenu(row) = control {
            let script = self.row_script(
                row,
                &format!(
                    "const b = row.querySelector({}); if (!b) return false; b.click(); return true;",
                    js_string(&self.options.selectors.row_menu)
                ),
            );
            return match self.evaluate(&script)?.and_then(|v| v.as_bool()) {
                Some(true) => Ok(()),
                _ => Err(DriverError::ElementNotFound(control.to_string())),
            };
        }

        let el = self.element(control, self.options.lookup_timeout)?;
        el.click()
            .map_err(|e| DriverError::NotInteractable(format!("{}: {}", control, e)))?;
        debug!("clicked {}", control);
        Ok(())
    }

    fn type_text(&mut self, control: Control, text: &str) -> Result<(), DriverError> {
        let el = self.element(control, self.options.lookup_timeout)?;
        el.focus()
            .map_err(|e| DriverError::NotInteractable(format!("{}: {}", control, e)))?;
        self.tab
            .type_str(text)
            .map_err(|e| DriverError::NotInteractable(format!("{}: {}", control, e)))?;
        Ok(())
    }

    fn submit(&mut self, control: Control) -> Result<(), DriverError> {
        let el = self.element(control, self.options.lookup_timeout)?;
        el.focus()
            .map_err(|e| DriverError::NotInteractable(format!("{}: {}", control, e)))?;
        self.tab
            .press_key("Enter")
            .map_err(|e| DriverError::NotInteractable(format!("{}: {}", control, e)))?;
        Ok(())
    }

    fn scroll_height(&mut self) -> Result<u64, DriverError> {
        let script = self.container_script("return c.scrollHeight;");
        match self.evaluate(&script)?.and_then(|v| v.as_f64()) {
            Some(h) => Ok(h as u64),
            None => Err(DriverError::ElementNotFound(
                Control::ResultsContainer.to_string(),
            )),
        }
    }

    fn scroll_to(&mut self, offset: u64) -> Result<(), DriverError> {
        let script = self.container_script(&format!("c.scrollTop = {}; return true;", offset));
        match self.evaluate(&script)? {
            Some(Value::Bool(true)) => Ok(()),
            _ => Err(DriverError::ElementNotFound(
                Control::ResultsContainer.to_string(),
            )),
        }
    }

    fn row_count(&mut self) -> Result<usize, DriverError> {
        let script = format!(
            "document.querySelectorAll({}).length",
            js_string(&self.options.selectors.result_rows)
        );
        Ok(self
            .evaluate(&script)?
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as usize)
    }

    fn row_identity(&mut self, row: usize) -> Result<RowIdentity, DriverError> {
        let script = self.row_script(
            row,
            &format!(
                "const el = row.querySelector({}); if (!el) return null; \
                 return JSON.stringify({{ name: (el.innerText || '').trim(), href: el.href || el.getAttribute('href') || '' }});",
                js_string(&self.options.selectors.lead_name)
            ),
        );
        let missing = || DriverError::ElementNotFound(format!("lead name in row {}", row + 1));

        let raw = match self.evaluate(&script)? {
            Some(Value::String(s)) => s,
            _ => return Err(missing()),
        };
        let parsed: Value =
            serde_json::from_str(&raw).map_err(|e| DriverError::Script(e.to_string()))?;
        let name = parsed["name"].as_str().unwrap_or_default().to_string();
        let profile_url = parsed["href"].as_str().unwrap_or_default().to_string();
        if name.is_empty() || profile_url.is_empty() {
            return Err(missing());
        }
        Ok(RowIdentity { name, profile_url })
    }

    fn kill_switch(&self) -> KillSwitch {
        let pid = self.browser.get_process_id();
        KillSwitch::new(move || match pid {
            Some(pid) => kill_process(pid),
            None => false,
        })
    }

    fn close(&mut self) {
        self.kill();
    }
}

impl Drop for BrowserController {
    fn drop(&mut self) {
        debug!("killing browser process...");
        self.kill();
    }
}

fn kill_process(pid: u32) -> bool {
    let mut s = System::new();
    let pid = Pid::from_u32(pid);
    if !s.refresh_process(pid) {
        return false;
    }
    if let Some(process) = s.process(pid) {
        debug!("killing process with id {}", pid);
        return process.kill();
    }
    false
}

/// Quotes `s` as a javascript string literal.
fn js_string(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn js_string_escapes_quotes() {
        assert_eq!(
            js_string(r#"[data-view-name="search-results-lead-name"]"#),
            r#""[data-view-name=\"search-results-lead-name\"]""#
        );
    }

    #[test]
    fn default_selectors_cover_every_control_but_rows() {
        let s = Selectors::default();
        assert!(matches!(s.locator(Control::NextPage), Some(Locator::XPath(_))));
        assert!(matches!(s.locator(Control::NoteField), Some(Locator::Css(_))));
        assert!(s.locator(Control::RowMenu(0)).is_none());
    }
}

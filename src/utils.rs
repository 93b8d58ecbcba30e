use chrono::{Local, NaiveDate};
use rand::{distributions::Alphanumeric, thread_rng, Rng};
use std::{path::PathBuf, time::Duration};

pub const GLOBAL_STORE_FILE: &str = "leads_data.json";
pub const LEAD_NAME_PLACEHOLDER: &str = "[lead_name]";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const DATE_FORMAT: &str = "%Y-%m-%d";

lazy_static! {
    pub static ref DB_DIR: PathBuf = {
        match std::env::var("LEADS_DB_DIR") {
            Ok(d) if !d.is_empty() => PathBuf::from(d),
            _ => PathBuf::from("db"),
        }
    };
    pub static ref HOME_URL: String = {
        std::env::var("SALES_HOME_URL").unwrap_or_else(|_| "https://www.linkedin.com/sales".into())
    };
    pub static ref LOGIN_URL: String = {
        std::env::var("SALES_LOGIN_URL")
            .unwrap_or_else(|_| "https://www.linkedin.com/login".into())
    };
}

/// A random duration in `[min, max]`. Equal bounds give that exact duration.
pub fn random_between(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let mut rng = rand::thread_rng();
    let ms = rng.gen_range(min.as_millis()..=max.as_millis());
    Duration::from_millis(ms as u64)
}

pub fn pause(min: Duration, max: Duration) {
    let d = random_between(min, max);
    if !d.is_zero() {
        std::thread::sleep(d);
    }
}

pub fn get_random_string(len: i32) -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len as usize)
        .map(char::from)
        .collect()
}

pub fn timestamp() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// "jane DOE" -> "Jane Doe"
pub fn title_case(name: &str) -> String {
    name.to_lowercase()
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

pub fn personalize_note(template: &str, lead_name: &str) -> String {
    if !template.contains(LEAD_NAME_PLACEHOLDER) {
        return template.to_string();
    }
    template.replace(LEAD_NAME_PLACEHOLDER, &title_case(lead_name))
}

pub fn is_login_redirect(url: &str) -> bool {
    url.to_lowercase().contains("login")
}

pub fn sanitize_template_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, ' ' | '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

pub fn daily_store_filename(date: NaiveDate, template_name: &str) -> String {
    format!(
        "{}-{}.json",
        date.format(DATE_FORMAT),
        sanitize_template_name(template_name)
    )
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn personalizes_note_with_title_cased_name() {
        assert_eq!(
            personalize_note("Hi [lead_name], let's connect", "jane DOE"),
            "Hi Jane Doe, let's connect"
        );
    }

    #[test]
    fn note_without_placeholder_is_untouched() {
        assert_eq!(personalize_note("Hello there", "jane"), "Hello there");
    }

    #[test]
    fn title_case_collapses_whitespace() {
        assert_eq!(title_case("  mary   ANN o'neil "), "Mary Ann O'neil");
        assert_eq!(title_case(""), "");
    }

    #[test]
    fn daily_filename_uses_date_and_template() {
        let d = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        assert_eq!(daily_store_filename(d, "founders"), "2024-05-01-founders.json");
        assert_eq!(
            daily_store_filename(d, "../etc/passwd"),
            "2024-05-01-.._etc_passwd.json"
        );
    }

    #[test]
    fn detects_login_redirects() {
        assert!(is_login_redirect("https://www.linkedin.com/LOGIN?session_redirect=x"));
        assert!(!is_login_redirect("https://www.linkedin.com/sales/search/people"));
    }

    #[test]
    fn random_between_respects_bounds() {
        let min = Duration::from_millis(10);
        let max = Duration::from_millis(20);
        for _ in 0..50 {
            let d = random_between(min, max);
            assert!(d >= min && d <= max);
        }
        assert_eq!(random_between(max, min), max);
    }

    #[test]
    fn random_string_has_requested_length() {
        assert_eq!(get_random_string(11).len(), 11);
    }
}

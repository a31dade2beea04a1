//! Login flow against the SolarOS portal.
//!
//! A [`Session`] lives for exactly one scrape cycle: every call to
//! [`PortalClient::acquire_session`] starts from an empty cookie jar.

use crate::config::{FormLocator, PortalConfig};
use crate::error::{AppError, Result};
use crate::extract;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::{Client, Url};
use scraper::{ElementRef, Html, Selector};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) solaros-bridge";

/// Authenticated data resource for one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub data_url: String,
}

/// A login form with its credential inputs identified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginForm {
    pub action: Url,
    pub post: bool,
    pub username_field: String,
    pub password_field: String,
    /// Other named inputs, submitted unchanged.
    pub hidden: Vec<(String, String)>,
}

impl LoginForm {
    /// Locate the credential form in `html` according to `locator`.
    pub fn locate(html: &str, page_url: &Url, locator: &FormLocator) -> Option<Self> {
        let document = Html::parse_document(html);
        let form_sel = Selector::parse("form").ok()?;
        let input_sel = Selector::parse("input").ok()?;

        let mut forms = document.select(&form_sel);
        let (form, username, password) = match locator {
            FormLocator::Positional { form_index } => {
                let form = forms.nth(*form_index)?;
                let mut inputs = form.select(&input_sel);
                let username = input_name(&inputs.next()?)?;
                let password = input_name(&inputs.next()?)?;
                (form, username, password)
            }
            FormLocator::PasswordField => {
                let form = forms.find(|f| {
                    f.select(&input_sel)
                        .any(|i| input_type(&i) == "password")
                })?;
                let password = form
                    .select(&input_sel)
                    .find(|i| input_type(i) == "password")
                    .and_then(|i| input_name(&i))?;
                let username = form
                    .select(&input_sel)
                    .find(|i| matches!(input_type(i).as_str(), "text" | "email"))
                    .and_then(|i| input_name(&i))?;
                (form, username, password)
            }
        };

        let hidden = form
            .select(&input_sel)
            .filter_map(|i| {
                let name = input_name(&i)?;
                if name == username || name == password {
                    return None;
                }
                Some((name, i.value().attr("value").unwrap_or("").to_string()))
            })
            .collect();

        let action = match form.value().attr("action").filter(|a| !a.is_empty()) {
            Some(raw) => page_url.join(raw).ok()?,
            None => page_url.clone(),
        };
        let post = form
            .value()
            .attr("method")
            .is_some_and(|m| m.eq_ignore_ascii_case("post"));

        Some(Self {
            action,
            post,
            username_field: username,
            password_field: password,
            hidden,
        })
    }

    /// Field list as submitted: credentials first, then the form's other inputs.
    pub fn fields(&self, username: &str, password: &str) -> Vec<(String, String)> {
        let mut fields = vec![
            (self.username_field.clone(), username.to_string()),
            (self.password_field.clone(), password.to_string()),
        ];
        fields.extend(self.hidden.iter().cloned());
        fields
    }
}

fn input_name(input: &ElementRef<'_>) -> Option<String> {
    input
        .value()
        .attr("name")
        .filter(|n| !n.is_empty())
        .map(String::from)
}

fn input_type(input: &ElementRef<'_>) -> String {
    input
        .value()
        .attr("type")
        .unwrap_or("text")
        .to_ascii_lowercase()
}

/// Pick the session token out of ordered `(name, value)` cookie pairs.
///
/// With `name` set, that cookie's value; otherwise the first cookie's.
pub fn session_token<'a, I>(cookies: I, name: Option<&str>) -> Option<String>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    cookies
        .into_iter()
        .find(|(cookie, _)| name.map_or(true, |n| *cookie == n))
        .map(|(_, value)| value.to_string())
        .filter(|v| !v.is_empty())
}

/// Split a `Cookie` request header into `(name, value)` pairs.
pub fn cookie_pairs(header: &str) -> impl Iterator<Item = (&str, &str)> {
    header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
}

fn set_cookies(resp: &reqwest::Response) -> Vec<(String, String)> {
    resp.cookies()
        .map(|c| (c.name().to_string(), c.value().to_string()))
        .collect()
}

/// `<base>/<token>/<page>?<key>=<value>&_=<now>`
pub fn data_url(base: &str, token: &str, page: &str, watch: &(String, String), now: i64) -> String {
    format!(
        "{}/{}/{}?{}={}&_={}",
        base.trim_end_matches('/'),
        token,
        page,
        watch.0,
        watch.1,
        now
    )
}

pub struct PortalClient {
    config: PortalConfig,
    timeout: Duration,
}

impl PortalClient {
    pub fn new(config: PortalConfig) -> Result<Self> {
        Url::parse(&config.login_url)
            .map_err(|e| AppError::Config(format!("invalid login_url: {e}")))?;
        let timeout = Duration::from_secs(config.request_timeout_secs);
        Ok(Self { config, timeout })
    }

    /// Plain client for fetching the data resource.
    pub fn http_client(&self) -> Result<Client> {
        Client::builder()
            .timeout(self.timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| AppError::Transport(e.to_string()))
    }

    /// Log in and derive this cycle's data resource URL.
    pub async fn acquire_session(&self) -> Result<Session> {
        let login_url = Url::parse(&self.config.login_url)
            .map_err(|e| AppError::Config(format!("invalid login_url: {e}")))?;
        let jar = Arc::new(Jar::default());
        let http = Client::builder()
            .timeout(self.timeout)
            .user_agent(USER_AGENT)
            .cookie_provider(jar.clone())
            .build()
            .map_err(|e| AppError::Transport(e.to_string()))?;

        let resp = http
            .get(login_url.clone())
            .send()
            .await
            .map_err(|e| AppError::Transport(format!("login page: {e}")))?;
        if !resp.status().is_success() {
            return Err(AppError::Transport(format!(
                "login page returned {}",
                resp.status()
            )));
        }
        let page_url = resp.url().clone();
        let page_cookies = set_cookies(&resp);
        let html = resp
            .text()
            .await
            .map_err(|e| AppError::Transport(format!("login page body: {e}")))?;

        let form = LoginForm::locate(&html, &page_url, &self.config.login_form)
            .ok_or_else(|| AppError::Auth("login form not found on portal page".to_string()))?;
        debug!(action = %form.action, post = form.post, "submitting login form");

        let fields = form.fields(&self.config.username, &self.config.password);
        let request = if form.post {
            http.post(form.action.clone()).form(&fields)
        } else {
            http.get(form.action.clone()).query(&fields)
        };
        let resp = request
            .send()
            .await
            .map_err(|e| AppError::Auth(format!("login submission: {e}")))?;
        if !resp.status().is_success() {
            return Err(AppError::Auth(format!(
                "login submission returned {}",
                resp.status()
            )));
        }
        let landing_url = resp.url().clone();
        // Set-Cookie order: the submission response first, then the login page.
        let mut issued = set_cookies(&resp);
        issued.extend(page_cookies);
        let body = resp
            .text()
            .await
            .map_err(|e| AppError::Auth(format!("login response body: {e}")))?;

        let name = self.config.session_cookie.as_deref();
        let issued_pairs = issued.iter().map(|(n, v)| (n.as_str(), v.as_str()));
        let token = session_token(issued_pairs, name)
            .or_else(|| {
                // Cookies set during a redirected login only reach the jar.
                let header = jar
                    .cookies(&landing_url)
                    .or_else(|| jar.cookies(&login_url))?;
                let header = header.to_str().ok()?;
                session_token(cookie_pairs(header), name)
            })
            .ok_or_else(|| AppError::Auth("portal set no session cookie".to_string()))?;

        let page = extract::script_string(&body, "lift_page")
            .ok_or_else(|| AppError::Auth("no lift_page after login".to_string()))?;
        let watch = extract::script_pair(&body, "lift_toWatch")
            .ok_or_else(|| AppError::Auth("no lift_toWatch after login".to_string()))?;

        let data_url = data_url(
            &self.config.data_url_base,
            &token,
            &page,
            &watch,
            chrono::Utc::now().timestamp(),
        );
        Ok(Session { token, data_url })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const LOGIN_PAGE: &str = r#"
        <html><body>
          <form action="/search"><input name="q"></form>
          <form method="POST" action="/account/login">
            <input type="text" name="login_user" id="u">
            <input type="password" name="login_pass" id="p">
            <input type="hidden" name="csrf" value="xyz">
            <input type="submit" value="Log in">
          </form>
        </body></html>
    "#;

    fn page_url() -> Url {
        Url::parse("https://portal.example/index.php").unwrap()
    }

    #[test]
    fn test_positional_locator_uses_second_form() {
        let form = LoginForm::locate(LOGIN_PAGE, &page_url(), &FormLocator::default()).unwrap();
        assert_eq!(form.action.as_str(), "https://portal.example/account/login");
        assert!(form.post);
        assert_eq!(form.username_field, "login_user");
        assert_eq!(form.password_field, "login_pass");
        assert_eq!(form.hidden, vec![("csrf".to_string(), "xyz".to_string())]);
    }

    #[test]
    fn test_password_field_locator() {
        let form =
            LoginForm::locate(LOGIN_PAGE, &page_url(), &FormLocator::PasswordField).unwrap();
        assert_eq!(form.username_field, "login_user");
        assert_eq!(form.password_field, "login_pass");
    }

    #[test]
    fn test_missing_form_is_none() {
        let html = "<form><input name=\"q\"></form>";
        assert!(LoginForm::locate(html, &page_url(), &FormLocator::default()).is_none());
        assert!(LoginForm::locate(html, &page_url(), &FormLocator::PasswordField).is_none());
    }

    #[test]
    fn test_form_without_action_posts_back_to_page() {
        let html = r#"<form></form><form><input name="a"><input name="b"></form>"#;
        let form = LoginForm::locate(html, &page_url(), &FormLocator::default()).unwrap();
        assert_eq!(form.action, page_url());
        assert!(!form.post);
    }

    #[test]
    fn test_fields_put_credentials_first() {
        let form = LoginForm::locate(LOGIN_PAGE, &page_url(), &FormLocator::default()).unwrap();
        assert_eq!(
            form.fields("me", "pw"),
            vec![
                ("login_user".to_string(), "me".to_string()),
                ("login_pass".to_string(), "pw".to_string()),
                ("csrf".to_string(), "xyz".to_string()),
            ]
        );
    }

    #[test]
    fn test_session_token_first_cookie() {
        assert_eq!(
            session_token(cookie_pairs("PHPSESSID=tok123; lang=en"), None).as_deref(),
            Some("tok123")
        );
        let issued = [("PHPSESSID", "tok123"), ("lang", "en"), ("tz", "utc")];
        assert_eq!(session_token(issued, None).as_deref(), Some("tok123"));
    }

    #[test]
    fn test_session_token_named_cookie() {
        assert_eq!(
            session_token(cookie_pairs("lang=en; sid=a=b"), Some("sid")).as_deref(),
            Some("a=b")
        );
        assert_eq!(session_token(cookie_pairs("lang=en"), Some("sid")), None);
    }

    #[test]
    fn test_data_url_shape() {
        let watch = ("k".to_string(), "v".to_string());
        assert_eq!(
            data_url("https://host/comet_request/42/", "tok", "abc123", &watch, 1_700_000_000),
            "https://host/comet_request/42/tok/abc123?k=v&_=1700000000"
        );
    }

    #[test]
    fn test_invalid_login_url_rejected() {
        let cfg: PortalConfig = serde_yaml::from_str("login_url: not a url").unwrap();
        assert!(matches!(PortalClient::new(cfg), Err(AppError::Config(_))));
    }
}

//! Session cookie handling
//!
//! Issues and clears the session cookies with consistent attributes
//! (`Path=/`, `HttpOnly`, `Secure`, `SameSite`) and splits values larger
//! than a browser's 4KB cookie budget into `-1`, `-2`… suffixed chunks that
//! are reassembled on the way back in.

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};

use crate::config::Config;

/// Longest value stored in a single cookie before chunking
const MAX_COOKIE_CHUNK: usize = 3850;

/// Cookie factory carrying the configured attributes
#[derive(Clone)]
pub struct CookieWriter {
    secure: bool,
    same_site: SameSite,
    domain: Option<String>,
}

impl CookieWriter {
    /// Build from configuration
    #[must_use]
    pub fn new(config: &Config) -> Self {
        let same_site = match config.same_site_cookie.to_ascii_lowercase().as_str() {
            "strict" => SameSite::Strict,
            "none" => SameSite::None,
            _ => SameSite::Lax,
        };
        Self {
            secure: config.secure_cookie,
            same_site,
            domain: config.cookie_domain.clone(),
        }
    }

    fn cookie(&self, name: String, value: String, max_age_secs: i64) -> Cookie<'static> {
        let mut builder = Cookie::build((name, value))
            .path("/")
            .http_only(true)
            .secure(self.secure)
            .same_site(self.same_site)
            .max_age(time::Duration::seconds(max_age_secs));
        if let Some(ref domain) = self.domain {
            builder = builder.domain(domain.clone());
        }
        builder.build()
    }

    /// Write a value, splitting into chunk cookies when it exceeds the
    /// per-cookie budget
    #[must_use]
    pub fn write(&self, jar: CookieJar, name: &str, value: &str, max_age_secs: i64) -> CookieJar {
        let mut jar = jar;
        if value.len() <= MAX_COOKIE_CHUNK {
            return jar.add(self.cookie(name.to_string(), value.to_string(), max_age_secs));
        }

        let chunks: Vec<&str> = value
            .as_bytes()
            .chunks(MAX_COOKIE_CHUNK)
            // cookie values are base64url/JWT text, chunk boundaries are safe
            .map(|c| std::str::from_utf8(c).unwrap_or_default())
            .collect();

        for (idx, chunk) in chunks.iter().enumerate() {
            let chunk_name = if idx == 0 {
                name.to_string()
            } else {
                format!("{name}-{idx}")
            };
            jar = jar.add(self.cookie(chunk_name, (*chunk).to_string(), max_age_secs));
        }
        jar
    }

    /// Read a value, reassembling chunk cookies in order
    #[must_use]
    pub fn read(&self, jar: &CookieJar, name: &str) -> Option<String> {
        let mut value = jar.get(name)?.value().to_string();
        let mut idx = 1;
        while let Some(chunk) = jar.get(&format!("{name}-{idx}")) {
            value.push_str(chunk.value());
            idx += 1;
        }
        Some(value)
    }

    /// Clear a cookie and any of its chunks present in the jar
    #[must_use]
    pub fn clear(&self, jar: CookieJar, name: &str) -> CookieJar {
        let mut jar = jar;
        let chunk_names: Vec<String> = (1..)
            .map(|idx| format!("{name}-{idx}"))
            .take_while(|chunk| jar.get(chunk).is_some())
            .collect();

        jar = jar.add(self.cookie(name.to_string(), String::new(), 0));
        for chunk in chunk_names {
            jar = jar.add(self.cookie(chunk, String::new(), 0));
        }
        jar
    }
}

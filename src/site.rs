//! SharePoint site URL validation and parsing.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, Result};

static SITE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https://([A-Za-z0-9-]+(?:\.[A-Za-z0-9-]+)*\.sharepoint\.com)(/.*)?$")
        .expect("valid regex")
});

/// A parsed SharePoint site address: tenant hostname plus server-relative
/// site path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteAddress {
    /// Tenant hostname, e.g. `contoso.sharepoint.com`.
    pub hostname: String,
    /// Server-relative path without leading slash, e.g. `sites/engineering`.
    /// Empty for the tenant root site.
    pub site_path: String,
}

impl SiteAddress {
    /// Parses and validates a site URL like
    /// `https://contoso.sharepoint.com/sites/engineering`.
    ///
    /// Trailing slashes are tolerated.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` for anything that is not an https
    /// sharepoint.com URL.
    pub fn parse(url: &str) -> Result<Self> {
        let trimmed = url.trim().trim_end_matches('/');
        let captures = SITE_RE.captures(trimmed).ok_or_else(|| {
            Error::Configuration(format!("invalid SharePoint site URL: {url:?}"))
        })?;
        let hostname = captures[1].to_string();
        let site_path = captures
            .get(2)
            .map(|m| m.as_str().trim_matches('/').to_string())
            .unwrap_or_default();
        Ok(Self {
            hostname,
            site_path,
        })
    }

    /// The site identifier segment used in Graph `/sites/{...}` requests:
    /// `hostname:/path:` for a named site, or just the hostname for the
    /// tenant root.
    #[must_use]
    pub fn graph_identifier(&self) -> String {
        if self.site_path.is_empty() {
            self.hostname.clone()
        } else {
            format!("{}:/{}:", self.hostname, self.site_path)
        }
    }
}

impl std::fmt::Display for SiteAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.site_path.is_empty() {
            write!(f, "https://{}", self.hostname)
        } else {
            write!(f, "https://{}/{}", self.hostname, self.site_path)
        }
    }
}

/// Whether a string looks like a SharePoint site URL.
#[must_use]
pub fn is_sharepoint_url(url: &str) -> bool {
    SITE_RE.is_match(url.trim().trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_named_site() {
        let site = SiteAddress::parse("https://contoso.sharepoint.com/sites/engineering").unwrap();
        assert_eq!(site.hostname, "contoso.sharepoint.com");
        assert_eq!(site.site_path, "sites/engineering");
        assert_eq!(
            site.graph_identifier(),
            "contoso.sharepoint.com:/sites/engineering:"
        );
    }

    #[test]
    fn parses_tenant_root() {
        let site = SiteAddress::parse("https://contoso.sharepoint.com").unwrap();
        assert_eq!(site.hostname, "contoso.sharepoint.com");
        assert!(site.site_path.is_empty());
        assert_eq!(site.graph_identifier(), "contoso.sharepoint.com");
    }

    #[test]
    fn tolerates_trailing_slash() {
        let site = SiteAddress::parse("https://contoso.sharepoint.com/sites/hr/").unwrap();
        assert_eq!(site.site_path, "sites/hr");
    }

    #[test]
    fn rejects_non_sharepoint_urls() {
        assert!(SiteAddress::parse("https://example.com/sites/x").is_err());
        assert!(SiteAddress::parse("http://contoso.sharepoint.com").is_err());
        assert!(SiteAddress::parse("contoso.sharepoint.com").is_err());
        assert!(SiteAddress::parse("").is_err());
    }

    #[test]
    fn rejects_lookalike_hosts() {
        assert!(SiteAddress::parse("https://contoso.sharepoint.com.evil.example").is_err());
    }

    #[test]
    fn is_sharepoint_url_matches_parse() {
        assert!(is_sharepoint_url("https://a.sharepoint.com/sites/x"));
        assert!(!is_sharepoint_url("https://a.example.com/sites/x"));
    }

    #[test]
    fn display_round_trips() {
        let url = "https://contoso.sharepoint.com/sites/engineering";
        assert_eq!(SiteAddress::parse(url).unwrap().to_string(), url);
    }
}

use serde::{Deserialize, Serialize};
use url::Url;

/// The four backend endpoints one kind of upload talks to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadConfig {
    pub direct_upload: Url,
    pub initiate_multipart: Url,
    pub verify_part: Url,
    pub complete_multipart: Url,
}

/// Endpoint routes relative to a site's base URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileRoutes {
    pub direct_upload: String,
    pub initiate_multipart: String,
    pub verify_part: String,
    pub complete_multipart: String,
}

impl ProfileRoutes {
    fn under(prefix: &str) -> Self {
        Self {
            direct_upload: format!("{prefix}/upload"),
            initiate_multipart: format!("{prefix}/multipart/initiate"),
            verify_part: format!("{prefix}/multipart/verify-part"),
            complete_multipart: format!("{prefix}/multipart/complete"),
        }
    }

    /// Joins every route onto `base_url`. Absolute routes are kept as they are.
    pub fn resolve(&self, base_url: &Url) -> Result<UploadConfig, url::ParseError> {
        Ok(UploadConfig {
            direct_upload: base_url.join(&self.direct_upload)?,
            initiate_multipart: base_url.join(&self.initiate_multipart)?,
            verify_part: base_url.join(&self.verify_part)?,
            complete_multipart: base_url.join(&self.complete_multipart)?,
        })
    }
}

/// Profiles every deployment of the site exposes.
pub fn builtin_profiles() -> Vec<(&'static str, ProfileRoutes)> {
    vec![
        ("media", ProfileRoutes::under("api/media")),
        ("complaint", ProfileRoutes::under("api/complaints/attachments")),
        ("emergency", ProfileRoutes::under("api/emergency-reports/attachments")),
        ("volunteer", ProfileRoutes::under("api/volunteers/photos")),
    ]
}

pub fn builtin_profile(name: &str) -> Option<ProfileRoutes> {
    builtin_profiles()
        .into_iter()
        .find(|(profile, _)| *profile == name)
        .map(|(_, routes)| routes)
}

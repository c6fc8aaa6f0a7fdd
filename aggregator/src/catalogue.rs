//! Institution catalogue.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use ratewatch_common::{InstitutionProfile, RateWatchError, Result};
use ratewatch_fx::{InstitutionDescriptor, SourceAdapter};
use tracing::info;

/// (slug, short name, display name)
const BANKS: [(&str, &str, &str); 25] = [
    ("nbe", "nbe", "National Bank of Ethiopia"),
    ("cbe", "cbe", "Commercial Bank of Ethiopia"),
    ("abyssinia", "boa", "Bank of Abyssinia"),
    ("abay", "aba", "Abay Bank"),
    ("addis", "add", "Addis International Bank"),
    ("ahadu", "aha", "Ahadu Bank"),
    ("amhara", "amh", "Amhara Bank"),
    ("awash", "awa", "Awash Bank"),
    ("berhan", "brh", "Berhan Bank"),
    ("bunna", "bun", "Bunna Bank"),
    ("coop", "coo", "Cooperative Bank of Oromia"),
    ("dashen", "dsh", "Dashen Bank"),
    ("enat", "ena", "Enat Bank"),
    ("gadaa", "gad", "Gadaa Bank"),
    ("global", "glo", "Global Bank"),
    ("goh", "goh", "Goh Betoch Bank"),
    ("hibret", "hib", "Hibret Bank"),
    ("hijra", "hij", "Hijra Bank"),
    ("nib", "nib", "Nib International Bank"),
    ("oromia", "oro", "Oromia Bank"),
    ("siinqee", "snq", "Siinqee Bank"),
    ("tsedey", "tsd", "Tsedey Bank"),
    ("tsehay", "tsa", "Tsehay Bank"),
    ("wegagen", "weg", "Wegagen Bank"),
    ("zemen", "zmn", "Zemen Bank"),
];

/// The built-in list of tracked banks, in processing order.
pub fn default_catalogue() -> Vec<InstitutionProfile> {
    BANKS
        .iter()
        .map(|(slug, short, name)| {
            InstitutionProfile::new(*slug, *name, *short, short.to_uppercase())
        })
        .collect()
}

/// Read a catalogue file: a JSON array of institution profiles.
pub async fn load_catalogue(path: &Path) -> Result<Vec<InstitutionProfile>> {
    let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
        RateWatchError::ConfigurationError(format!(
            "cannot read catalogue {}: {e}",
            path.display()
        ))
    })?;

    let profiles = parse_catalogue(&raw)?;
    info!(path = %path.display(), institutions = profiles.len(), "Catalogue loaded");
    Ok(profiles)
}

/// Parse and validate catalogue JSON.
pub fn parse_catalogue(raw: &str) -> Result<Vec<InstitutionProfile>> {
    let profiles: Vec<InstitutionProfile> = serde_json::from_str(raw)
        .map_err(|e| RateWatchError::ConfigurationError(format!("invalid catalogue: {e}")))?;

    let mut seen = HashSet::new();
    for profile in &profiles {
        if !profile.slug.is_valid() {
            return Err(RateWatchError::ConfigurationError(format!(
                "invalid institution slug '{}'",
                profile.slug
            )));
        }
        if !seen.insert(&profile.slug) {
            return Err(RateWatchError::ConfigurationError(format!(
                "institution '{}' listed twice",
                profile.slug
            )));
        }
    }

    Ok(profiles)
}

/// Attach the same adapter to every profile.
pub fn descriptors(
    profiles: Vec<InstitutionProfile>,
    adapter: Arc<dyn SourceAdapter>,
) -> Vec<InstitutionDescriptor> {
    profiles
        .into_iter()
        .map(|profile| InstitutionDescriptor::new(profile, adapter.clone()))
        .collect()
}

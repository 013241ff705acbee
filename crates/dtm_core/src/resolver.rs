//! Groups catalog tiles into dataset versions and picks the tiles to fetch.
//!
//! A *version* is a `(dataset name, vintage token)` pair. Versions whose
//! dataset names only differ by date fragments (`"GTA 2014-18"`, `"GTA 2023"`)
//! share a group key and can back-fill each other's gaps.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::year::{extract_latest_year, strip_year_fragments};
use crate::TileRecord;

/// Vintage token for tiles with no explicit or inferable year.
pub const UNSPECIFIED_VINTAGE: &str = "unspecified";

/// Policy for combining the selected version with an older sibling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverageMode {
    #[default]
    SelectedOnly,
    Blend,
    FallbackOnly,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown coverage mode `{0}` (expected selected, blend or fallback)")]
pub struct ParseCoverageModeError(String);

impl FromStr for CoverageMode {
    type Err = ParseCoverageModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "selected" | "selected_only" => Ok(CoverageMode::SelectedOnly),
            "blend" => Ok(CoverageMode::Blend),
            "fallback" | "fallback_only" => Ok(CoverageMode::FallbackOnly),
            _ => Err(ParseCoverageModeError(s.to_string())),
        }
    }
}

impl fmt::Display for CoverageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoverageMode::SelectedOnly => write!(f, "selected"),
            CoverageMode::Blend => write!(f, "blend"),
            CoverageMode::FallbackOnly => write!(f, "fallback"),
        }
    }
}

/// One selectable dataset version, derived fresh for every request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionOption {
    pub key: String,
    pub label: String,
    /// `None` when the vintage could not be read as a year.
    pub resolved_year: Option<u16>,
    pub group_key: String,
    pub dataset_name: String,
    pub vintage_token: String,
    pub tile_count: usize,
}

/// Vintage token: explicit hint, else latest year in dataset or tile name, else `"unspecified"`.
pub fn vintage_token(tile: &TileRecord) -> String {
    if let Some(hint) = tile
        .vintage_hint
        .as_deref()
        .map(str::trim)
        .filter(|hint| !hint.is_empty())
    {
        return hint.to_string();
    }

    let from_dataset = extract_latest_year(&tile.dataset_name);
    let from_tile = extract_latest_year(&tile.tile_name);
    match from_dataset.max(from_tile) {
        Some(year) => year.to_string(),
        None => UNSPECIFIED_VINTAGE.to_string(),
    }
}

/// Version key a tile belongs to: `"{dataset_name}::{vintage_token}"`.
pub fn option_key(tile: &TileRecord) -> String {
    compose_key(&tile.dataset_name, &vintage_token(tile))
}

fn compose_key(dataset_name: &str, token: &str) -> String {
    format!("{dataset_name}::{token}")
}

fn resolved_year(token: &str) -> Option<u16> {
    if token == UNSPECIFIED_VINTAGE {
        None
    } else {
        extract_latest_year(token)
    }
}

fn option_label(dataset_name: &str, token: &str) -> String {
    if token == UNSPECIFIED_VINTAGE || dataset_name.contains(token) {
        dataset_name.to_string()
    } else {
        format!("{dataset_name} ({token})")
    }
}

/// Dated options first (newest to oldest), then undated; ties by label, then key.
fn compare_options(a: &VersionOption, b: &VersionOption) -> Ordering {
    let by_year = match (a.resolved_year, b.resolved_year) {
        (Some(ya), Some(yb)) => yb.cmp(&ya),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_year
        .then_with(|| a.label.cmp(&b.label))
        .then_with(|| a.key.cmp(&b.key))
}

pub fn build_options(tiles: &[TileRecord]) -> Vec<VersionOption> {
    let mut groups: BTreeMap<(String, String), usize> = BTreeMap::new();
    for tile in tiles {
        *groups
            .entry((tile.dataset_name.clone(), vintage_token(tile)))
            .or_default() += 1;
    }

    let mut options: Vec<VersionOption> = groups
        .into_iter()
        .map(|((dataset_name, token), tile_count)| VersionOption {
            key: compose_key(&dataset_name, &token),
            label: option_label(&dataset_name, &token),
            resolved_year: resolved_year(&token),
            group_key: group_key(&dataset_name),
            dataset_name,
            vintage_token: token,
            tile_count,
        })
        .collect();
    options.sort_by(compare_options);
    options
}

pub fn default_key(tiles: &[TileRecord]) -> Option<String> {
    build_options(tiles).into_iter().next().map(|option| option.key)
}

/// Lower-cased dataset family with date fragments and punctuation removed.
///
/// Only relates sibling versions; never shown to users.
pub fn group_key(dataset_name: &str) -> String {
    let stripped = strip_year_fragments(&dataset_name.to_lowercase());
    let alphanumeric: String = stripped
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    alphanumeric.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Nearest older dated sibling of `selected_key`, if any.
pub fn fallback_key(selected_key: &str, options: &[VersionOption]) -> Option<String> {
    let selected = options.iter().find(|option| option.key == selected_key)?;
    let selected_year = selected.resolved_year?;

    options
        .iter()
        .filter(|option| option.key != selected.key && option.group_key == selected.group_key)
        .filter_map(|option| {
            option
                .resolved_year
                .filter(|year| *year < selected_year)
                .map(|year| (year, option))
        })
        .min_by(|(ya, a), (yb, b)| yb.cmp(ya).then_with(|| a.label.cmp(&b.label)))
        .map(|(_, option)| option.key.clone())
}

/// Tiles to fetch for `selected_key` under `mode`, in download order.
pub fn resolve(
    tiles: &[TileRecord],
    selected_key: Option<&str>,
    mode: CoverageMode,
) -> Vec<TileRecord> {
    let Some(selected_key) = selected_key else {
        return tiles.to_vec();
    };

    let tiles_with_key = |key: &str| -> Vec<TileRecord> {
        tiles
            .iter()
            .filter(|tile| option_key(tile) == key)
            .cloned()
            .collect()
    };

    let selected = tiles_with_key(selected_key);
    if selected.is_empty() {
        return selected;
    }

    let options = build_options(tiles);
    let fallback = match fallback_key(selected_key, &options) {
        Some(key) if mode != CoverageMode::SelectedOnly => key,
        _ => return selected,
    };

    match mode {
        CoverageMode::SelectedOnly => selected,
        CoverageMode::FallbackOnly => tiles_with_key(&fallback),
        CoverageMode::Blend => {
            let mut seen = HashSet::new();
            tiles_with_key(&fallback)
                .into_iter()
                .chain(selected)
                .filter(|tile| seen.insert(tile.identity()))
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_hint_wins_over_names() {
        let tile = TileRecord::new("GTA 2023", "Tile 2019").with_vintage_hint(" 2014-18 ");
        assert_eq!(vintage_token(&tile), "2014-18");
        assert_eq!(option_key(&tile), "GTA 2023::2014-18");
    }

    #[test]
    fn blank_hint_falls_back_to_names() {
        let tile = TileRecord::new("Muskoka", "Muskoka 2021 A").with_vintage_hint("  ");
        assert_eq!(vintage_token(&tile), "2021");
    }

    #[test]
    fn label_omits_year_already_in_name() {
        assert_eq!(option_label("GTA 2023", "2023"), "GTA 2023");
        assert_eq!(option_label("GTA", "2015"), "GTA (2015)");
        assert_eq!(option_label("Peel", UNSPECIFIED_VINTAGE), "Peel");
    }

    #[test]
    fn unreadable_hint_has_unknown_year() {
        assert_eq!(resolved_year("spring survey"), None);
        assert_eq!(resolved_year(UNSPECIFIED_VINTAGE), None);
        assert_eq!(resolved_year("2016-18"), Some(2018));
    }

    #[test]
    fn coverage_mode_parses_aliases() {
        assert_eq!("Blend".parse(), Ok(CoverageMode::Blend));
        assert_eq!("fallback-only".parse(), Ok(CoverageMode::FallbackOnly));
        assert_eq!("selected".parse(), Ok(CoverageMode::SelectedOnly));
        assert!("newest".parse::<CoverageMode>().is_err());
    }
}

use std::path::Path;

use crate::config::{InsurerProfile, ReconConfig};
use crate::error::ReconError;

/// Read-only set of insurer profiles. `Sync`; share it behind an `Arc` across
/// concurrent runs.
#[derive(Debug, Clone)]
pub struct ProfileRegistry {
    profiles: Vec<InsurerProfile>,
    names: Vec<Vec<Name>>,
}

/// A normalized insurer name in spaced (`" UNITED INDIA "`) and compact
/// (`"UNITEDINDIA"`) form.
#[derive(Debug, Clone)]
struct Name {
    spaced: String,
    compact: String,
}

impl Name {
    fn new(s: &str) -> Self {
        let words = normalize_hint(s);
        Self {
            compact: words.replace(' ', ""),
            spaced: format!(" {words} "),
        }
    }
}

/// Upper-case, runs of non-alphanumerics collapsed to one space, trimmed.
pub fn normalize_hint(s: &str) -> String {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_uppercase)
        .collect::<Vec<_>>()
        .join(" ")
}

// Shorter compact forms only match as whole words.
const MIN_COMPACT: usize = 4;

fn score(hint: &Name, alias: &Name) -> Option<usize> {
    if alias.compact.is_empty() || hint.compact.is_empty() {
        return None;
    }
    if hint.spaced.contains(&alias.spaced) {
        return Some(alias.compact.len());
    }
    if alias.compact.len() >= MIN_COMPACT && hint.compact.contains(&alias.compact) {
        return Some(alias.compact.len());
    }
    if hint.compact.len() >= MIN_COMPACT && alias.spaced.contains(&hint.spaced) {
        return Some(hint.compact.len());
    }
    None
}

impl ProfileRegistry {
    pub fn new(profiles: Vec<InsurerProfile>) -> Self {
        let names = profiles
            .iter()
            .map(|p| {
                std::iter::once(p.id.as_str())
                    .chain(p.aliases.iter().map(String::as_str))
                    .map(Name::new)
                    .collect()
            })
            .collect();
        Self { profiles, names }
    }

    pub fn from_config(config: &ReconConfig) -> Self {
        Self::new(config.insurers.clone())
    }

    pub fn profiles(&self) -> &[InsurerProfile] {
        &self.profiles
    }

    pub fn get(&self, id: &str) -> Option<&InsurerProfile> {
        self.profiles.iter().find(|p| p.id.eq_ignore_ascii_case(id.trim()))
    }

    /// Best profile for a free-text name: the longest matching alias wins,
    /// ties go to the profile declared first.
    pub fn detect_insurer(&self, name: &str) -> Option<&InsurerProfile> {
        let hint = Name::new(name);
        let mut best: Option<(usize, usize)> = None;
        for (i, names) in self.names.iter().enumerate() {
            let Some(s) = names.iter().filter_map(|n| score(&hint, n)).max() else {
                continue;
            };
            if best.map_or(true, |(_, b)| s > b) {
                best = Some((i, s));
            }
        }
        best.map(|(i, _)| &self.profiles[i])
    }

    /// Resolve an insurer hint (e.g. a user-supplied name) to its profile.
    pub fn resolve_profile(&self, hint: &str) -> Result<&InsurerProfile, ReconError> {
        self.detect_insurer(hint)
            .ok_or_else(|| ReconError::UnknownInsurer { hint: hint.to_string() })
    }

    /// Resolve from a file name; the extension is ignored.
    pub fn resolve_from_path(&self, path: &Path) -> Result<&InsurerProfile, ReconError> {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.detect_insurer(&stem).ok_or_else(|| ReconError::UnknownInsurer {
            hint: path.display().to_string(),
        })
    }
}

fn sheet_key(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Pick the workbook sheet for a profile. Candidates are tried in order; a
/// candidate ending in `*` matches by prefix. A profile without candidates
/// takes the first sheet.
pub fn select_sheet<'a>(
    profile: &InsurerProfile,
    available: &'a [String],
) -> Result<&'a str, ReconError> {
    if profile.sheets.is_empty() {
        if let Some(first) = available.first() {
            return Ok(first.as_str());
        }
    }
    for candidate in &profile.sheets {
        let (pattern, prefix) = match candidate.trim().strip_suffix('*') {
            Some(p) => (sheet_key(p), true),
            None => (sheet_key(candidate), false),
        };
        let hit = available.iter().find(|name| {
            let key = sheet_key(name);
            if prefix {
                key.starts_with(&pattern)
            } else {
                key == pattern
            }
        });
        if let Some(name) = hit {
            return Ok(name.as_str());
        }
    }
    Err(ReconError::SheetNotFound {
        insurer: profile.id.clone(),
        candidates: profile.sheets.clone(),
        available: available.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(id: &str, aliases: &[&str], sheets: &[&str]) -> InsurerProfile {
        InsurerProfile {
            id: id.into(),
            aliases: aliases.iter().map(|s| s.to_string()).collect(),
            sheets: sheets.iter().map(|s| s.to_string()).collect(),
            columns: Default::default(),
            filters: Vec::new(),
        }
    }

    fn registry() -> ProfileRegistry {
        ProfileRegistry::new(vec![
            profile("RELIANCE", &["Reliance General Insurance", "Reliance"], &["Sheet1"]),
            profile("UNITED", &["United India Insurance", "UIIC", "United"], &[]),
            profile("UNIVERSAL", &["Universal Sompo", "Sompo"], &[]),
            profile("HDFC", &["HDFC ERGO", "HDFC"], &[]),
            profile("INDIA", &["India"], &[]),
        ])
    }

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn resolves_aliases_case_insensitively() {
        let r = registry();
        assert_eq!(r.resolve_profile("reliance general insurance co. ltd").unwrap().id, "RELIANCE");
        assert_eq!(r.resolve_profile("uiic").unwrap().id, "UNITED");
        assert_eq!(r.resolve_profile("Universal Sompo General").unwrap().id, "UNIVERSAL");
        assert_eq!(r.resolve_profile("HDFCERGO").unwrap().id, "HDFC");
    }

    #[test]
    fn longest_alias_wins() {
        // "INDIA" matches too, but "UNITED INDIA INSURANCE" is longer.
        let r = registry();
        assert_eq!(r.resolve_profile("United India Insurance Company").unwrap().id, "UNITED");
        assert_eq!(r.resolve_profile("New India Assurance").unwrap().id, "INDIA");
    }

    #[test]
    fn filename_hints() {
        let r = registry();
        let p = r.resolve_from_path(Path::new("/data/reliance_mis_may25.xlsx")).unwrap();
        assert_eq!(p.id, "RELIANCE");
        let err = r.resolve_from_path(Path::new("acme-mis.csv")).unwrap_err();
        assert!(matches!(err, ReconError::UnknownInsurer { .. }));
    }

    #[test]
    fn unknown_insurer() {
        assert!(registry().detect_insurer("Acme Assurance").is_none());
        assert!(registry().detect_insurer("").is_none());
    }

    #[test]
    fn short_aliases_need_word_boundary() {
        let r = ProfileRegistry::new(vec![profile("SBI", &["SBI General"], &[])]);
        assert!(r.detect_insurer("SBI").is_some());
        assert!(r.detect_insurer("XSBIX Motors").is_none());
    }

    #[test]
    fn sheet_selection() {
        let p = profile("KOTAK", &[], &["sheet3", "Sheet1"]);
        let available = names(&["Summary", " Sheet  1", "Sheet3"]);
        assert_eq!(select_sheet(&p, &available).unwrap(), "Sheet3");

        let p = profile("BAJAJ", &[], &["New Business"]);
        let available = names(&["new   business", "Old"]);
        assert_eq!(select_sheet(&p, &available).unwrap(), "new   business");

        let p = profile("NATIONAL", &[], &["GNRDUMP*"]);
        let available = names(&["Info", "GNRDUMP_2025_05"]);
        assert_eq!(select_sheet(&p, &available).unwrap(), "GNRDUMP_2025_05");
    }

    #[test]
    fn sheet_not_found() {
        let p = profile("IFFCO", &[], &["Digital"]);
        let err = select_sheet(&p, &names(&["Raw"])).unwrap_err();
        match err {
            ReconError::SheetNotFound { insurer, available, .. } => {
                assert_eq!(insurer, "IFFCO");
                assert_eq!(available, vec!["Raw"]);
            }
            other => panic!("unexpected {other:?}"),
        }
        let any = profile("ANY", &[], &[]);
        assert_eq!(select_sheet(&any, &names(&["First", "Second"])).unwrap(), "First");
    }
}

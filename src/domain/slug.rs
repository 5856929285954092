//! Names on disk for projects and chapters.
//!
//! Titles are transliterated (Han characters through `pinyin`) and then
//! slugified, so `镖人` lands in `biao-ren`. Chapter directories use the slug
//! of their display name; two chapters with the same name are told apart by a
//! `_-_N` suffix.

use std::future::Future;

use pinyin::{Pinyin, ToPinyin};
use slug::slugify;
use thiserror::Error;

const MAX_SUFFIX_ATTEMPTS: usize = 64;
const SUFFIX_SEPARATOR: &str = "_-_";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SlugError {
    #[error("cannot name an entry after blank text")]
    EmptyInput,
    #[error("`{input}` has no characters usable in a name")]
    Unrepresentable { input: String },
    #[error("no free name left for `{base}`")]
    Exhausted { base: String },
}

/// [`first_free_name`] failures: naming, or the availability check itself.
#[derive(Debug, Error)]
pub enum SlugAsyncError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    #[error(transparent)]
    Slug(#[from] SlugError),
    #[error(transparent)]
    Predicate(E),
}

/// Slug for a project title or chapter label.
pub fn derive_slug(input: &str) -> Result<String, SlugError> {
    if input.trim().is_empty() {
        return Err(SlugError::EmptyInput);
    }
    match slugify(romanize(input)) {
        slug if slug.is_empty() => Err(SlugError::Unrepresentable {
            input: input.to_string(),
        }),
        slug => Ok(slug),
    }
}

/// Slugify a free-form filter value; returns an empty string when nothing survives.
pub fn normalize_filter(input: &str) -> String {
    slugify(romanize(input.trim()))
}

/// Human-readable chapter label, e.g. `Vol. 1 Ch. 2 - Title`.
///
/// The volume part is present only when a volume is set, the title part only
/// when a title is set.
pub fn chapter_display_name(volume: Option<&str>, chapter: &str, title: Option<&str>) -> String {
    let mut label = String::new();
    if let Some(volume) = volume.map(str::trim).filter(|v| !v.is_empty()) {
        label.push_str("Vol. ");
        label.push_str(volume);
        label.push(' ');
    }
    label.push_str("Ch. ");
    label.push_str(chapter.trim());
    if let Some(title) = title.map(str::trim).filter(|t| !t.is_empty()) {
        label.push_str(" - ");
        label.push_str(title);
    }
    label
}

/// Directory name for a chapter: the slug of its display name.
pub fn chapter_dir_name(
    volume: Option<&str>,
    chapter: &str,
    title: Option<&str>,
) -> Result<String, SlugError> {
    derive_slug(&chapter_display_name(volume, chapter, title))
}

/// The `attempt`-th disambiguated variant of `base` (`attempt == 0` is `base`).
pub fn disambiguated(base: &str, attempt: usize) -> String {
    if attempt == 0 {
        base.to_string()
    } else {
        format!("{base}{SUFFIX_SEPARATOR}{attempt}")
    }
}

/// Iterate over `base`, `base_-_1`, `base_-_2`, … up to the attempt ceiling.
pub fn candidates(base: &str) -> impl Iterator<Item = String> + '_ {
    (0..=MAX_SUFFIX_ATTEMPTS).map(move |attempt| disambiguated(base, attempt))
}

/// Iterate over `base`, `base_-_1`, `base_-_1_-_2`, … where each attempt
/// appends its suffix to the previous name. Older trees were laid out this way.
pub fn stacked_candidates(base: &str) -> impl Iterator<Item = String> + '_ {
    (0..=MAX_SUFFIX_ATTEMPTS).scan(base.to_string(), |name, attempt| {
        if attempt > 0 {
            name.push_str(SUFFIX_SEPARATOR);
            name.push_str(&attempt.to_string());
        }
        Some(name.clone())
    })
}

/// Return the first candidate name for which `is_free` resolves to `true`.
pub async fn first_free_name<F, Fut, E>(
    base: &str,
    mut is_free: F,
) -> Result<String, SlugAsyncError<E>>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<bool, E>>,
    E: std::error::Error + Send + Sync + 'static,
{
    for candidate in candidates(base) {
        if is_free(candidate.clone())
            .await
            .map_err(SlugAsyncError::Predicate)?
        {
            return Ok(candidate);
        }
    }

    Err(SlugAsyncError::Slug(SlugError::Exhausted {
        base: base.to_string(),
    }))
}

/// Extract the page number from an uploaded file name.
///
/// Leading zero padding is ignored and the first run of digits wins;
/// `None` when the name holds no usable number.
pub fn page_number(file_name: &str) -> Option<u32> {
    let trimmed = file_name.trim_start_matches('0');
    let start = trimmed.find(|c: char| c.is_ascii_digit())?;
    let digits: String = trimmed[start..]
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok().filter(|n| *n > 0)
}

/// Replace Han characters with space-separated pinyin syllables. Anything
/// else is left for `slugify` to keep or drop.
fn romanize(input: &str) -> String {
    input.chars().fold(String::with_capacity(input.len()), |mut out, ch| {
        match ch.to_pinyin() {
            Some(syllable) if !ch.is_ascii() => push_syllable(&mut out, syllable),
            _ if ch.is_whitespace() => out.push(' '),
            _ => out.push(ch),
        }
        out
    })
}

fn push_syllable(out: &mut String, syllable: Pinyin) {
    if !out.is_empty() && !out.ends_with(' ') {
        out.push(' ');
    }
    out.push_str(syllable.plain());
    out.push(' ');
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_slug_transliterates_chinese() {
        assert_eq!(derive_slug("镖人 Blades").expect("slug"), "biao-ren-blades");
        assert_eq!(derive_slug("一拳超人").expect("slug"), "yi-quan-chao-ren");
    }

    #[test]
    fn derive_slug_rejects_blank_input() {
        assert_eq!(derive_slug("   "), Err(SlugError::EmptyInput));
    }

    #[test]
    fn chapter_display_name_skips_missing_parts() {
        assert_eq!(chapter_display_name(None, "3", None), "Ch. 3");
        assert_eq!(
            chapter_display_name(Some("1"), "3", Some("The Start")),
            "Vol. 1 Ch. 3 - The Start"
        );
        assert_eq!(chapter_display_name(Some(""), "3.5", Some(" ")), "Ch. 3.5");
    }

    #[test]
    fn chapter_dir_name_is_slugified_label() {
        let name = chapter_dir_name(Some("2"), "10", Some("Foo Bar")).expect("dir name");
        assert_eq!(name, "vol-2-ch-10-foo-bar");
    }

    #[test]
    fn candidates_start_with_base_then_suffixes() {
        let names: Vec<_> = candidates("ch-1").take(3).collect();
        assert_eq!(names, vec!["ch-1", "ch-1_-_1", "ch-1_-_2"]);
    }

    #[test]
    fn stacked_candidates_extend_the_previous_name() {
        let names: Vec<_> = stacked_candidates("ch-1").take(4).collect();
        assert_eq!(names, vec!["ch-1", "ch-1_-_1", "ch-1_-_1_-_2", "ch-1_-_1_-_2_-_3"]);
    }

    #[test]
    fn page_number_reads_first_digit_run() {
        assert_eq!(page_number("001.png"), Some(1));
        assert_eq!(page_number("page-12-final.jpg"), Some(12));
        assert_eq!(page_number("cover.jpg"), None);
        assert_eq!(page_number("000.png"), None);
    }

    #[tokio::test]
    async fn first_free_name_skips_taken_candidates() {
        let taken = ["ch-1".to_string(), "ch-1_-_1".to_string()];

        let name = first_free_name("ch-1", |candidate| {
            let free = !taken.contains(&candidate);
            async move { Ok::<bool, std::convert::Infallible>(free) }
        })
        .await
        .expect("free name");

        assert_eq!(name, "ch-1_-_2");
    }

    #[tokio::test]
    async fn first_free_name_exhausts() {
        let result = first_free_name("ch-1", |_| async {
            Ok::<bool, std::convert::Infallible>(false)
        })
        .await;

        assert!(matches!(
            result,
            Err(SlugAsyncError::Slug(SlugError::Exhausted { .. }))
        ));
    }
}

//! Lexical `@mention` handling: extraction, normalization, injection and
//! capping. Everything here is pure string work; the only randomness is the
//! template pick in [`add_mention`], which takes the caller's RNG.

use rand::Rng;

/// Canonical form of a handle: lowercase, leading `@` stripped, only
/// alphanumeric characters kept.
pub fn normalize(token: &str) -> String {
    token
        .trim()
        .trim_start_matches('@')
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Normalize a batch of tokens, dropping forms that normalize to nothing and
/// duplicates (first occurrence wins).
pub fn normalize_all(tokens: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for t in tokens {
        let n = normalize(t);
        if !n.is_empty() && !out.contains(&n) {
            out.push(n);
        }
    }
    out
}

/// Scan `content` for `@token` captures (a token runs until whitespace or the
/// next `@`). Order of first appearance is preserved; duplicates are dropped
/// by normalized form. Tokens are returned without the leading `@`.
pub fn extract_mentions(content: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut seen: Vec<String> = Vec::new();
    let mut rest = content;

    while let Some(pos) = rest.find('@') {
        let after = &rest[pos + 1..];
        let end = after
            .find(|c: char| c.is_whitespace() || c == '@')
            .unwrap_or(after.len());
        let token = &after[..end];
        if !token.is_empty() {
            let norm = normalize(token);
            if !norm.is_empty() && !seen.contains(&norm) {
                seen.push(norm);
                out.push(token.to_string());
            }
        }
        rest = &after[end..];
    }
    out
}

/// Natural-language placements for an injected mention. `{m}` is the mention
/// token (with `@`), `{r}` the response text.
const MENTION_TEMPLATES: &[&str] = &[
    "{m}, {r}",
    "{m} {r}",
    "Hey {m}, {r}",
    "{m}, quick thought: {r}",
    "Good point, {m}. {r}",
    "Interesting, {m}. {r}",
    "{m}, I'll jump in here. {r}",
    "{m} raises something worth digging into. {r}",
    "Building on what {m} said: {r}",
    "To {m}'s point: {r}",
    "I hear you, {m}. {r}",
    "Fair enough, {m}. {r}",
    "{m}, consider this: {r}",
    "Picking up {m}'s thread: {r}",
    "Not to put {m} on the spot, but {r}",
    "Since {m} brought it up: {r}",
    "{m} got me thinking. {r}",
    "Riffing on {m} for a second: {r}",
    "Quick reply to {m}: {r}",
    "Here's my take, {m}: {r}",
    "{r} What do you think, {m}?",
    "{r} Curious where you land on this, {m}.",
    "{r} {m}, thoughts?",
    "{r} Over to you, {m}.",
    "{r} Would you agree, {m}?",
    "{r} {m} might see it differently.",
    "{r} I'd love your take, {m}.",
    "{r} Am I missing something, {m}?",
    "{r} {m}, you've thought about this more than I have.",
    "{r} Does that track, {m}?",
    "{r} Maybe {m} can settle this.",
    "{r} {m}, care to weigh in?",
    "{r} I suspect {m} has an opinion here.",
    "{r} How does that land, {m}?",
    "{r} {m}?",
    "{r} Your move, {m}.",
    "{r} (Looking at you, {m}.)",
    "{r} And yes, {m}, I stand by that.",
    "{r} Partly inspired by {m}, admittedly.",
    "{r} Someone should loop in {m} on this.",
];

/// Weave `target` (a mention token with leading `@`) into `response` using a
/// uniformly chosen placement template.
///
/// Identity cases: the target is already mentioned, or the response already
/// carries `max_unique` distinct mentions (the insertion would exceed the
/// cap).
pub fn add_mention<R: Rng>(response: &str, target: &str, max_unique: usize, rng: &mut R) -> String {
    let target_norm = normalize(target);
    if target_norm.is_empty() {
        return response.to_string();
    }

    let existing = extract_mentions(response);
    if existing.iter().any(|t| normalize(t) == target_norm) {
        return response.to_string();
    }
    if existing.len() >= max_unique {
        return response.to_string();
    }

    let template = MENTION_TEMPLATES[rng.gen_range(0..MENTION_TEMPLATES.len())];
    template
        .replace("{m}", target)
        .replace("{r}", response.trim())
}

/// Cap the number of distinct `@` mentions in `response` at `max`.
///
/// The first `max` unique tokens keep their `@` (all occurrences); every
/// further distinct token is demoted by dropping the `@` and leaving the bare
/// word.
pub fn limit_mentions(response: &str, max: usize) -> String {
    let mut out = String::with_capacity(response.len());
    let mut kept: Vec<String> = Vec::new();
    let mut rest = response;

    while let Some(pos) = rest.find('@') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let end = after
            .find(|c: char| c.is_whitespace() || c == '@')
            .unwrap_or(after.len());
        let token = &after[..end];
        let norm = normalize(token);

        if token.is_empty() || norm.is_empty() {
            out.push('@');
        } else if kept.contains(&norm) {
            out.push('@');
        } else if kept.len() < max {
            kept.push(norm);
            out.push('@');
        }
        // else: demoted — the '@' is dropped, the bare token stays.

        out.push_str(token);
        rest = &after[end..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn normalize_is_idempotent() {
        for raw in ["@Alice!", "  @Bob the 2nd ", "carol", "@@x", "🤖bot"] {
            let once = normalize(raw);
            assert_eq!(normalize(&once), once);
        }
    }

    #[test]
    fn normalize_strips_at_and_punctuation() {
        assert_eq!(normalize("@Alice,"), "alice");
        assert_eq!(normalize("Bob-3000"), "bob3000");
        assert_eq!(normalize("@"), "");
    }

    #[test]
    fn extract_preserves_order_and_dedupes() {
        let tokens = extract_mentions("ping @bob then @Alice then @BOB again");
        assert_eq!(tokens, vec!["bob", "Alice"]);
    }

    #[test]
    fn extract_splits_on_adjacent_at() {
        let tokens = extract_mentions("@a@b c");
        assert_eq!(tokens, vec!["a", "b"]);
    }

    #[test]
    fn extract_ignores_bare_at() {
        assert!(extract_mentions("meet @ noon").is_empty());
    }

    #[test]
    fn add_mention_is_identity_when_present() {
        let mut rng = StdRng::seed_from_u64(7);
        let s = "I agree with @alice on this.";
        assert_eq!(add_mention(s, "@Alice", 3, &mut rng), s);
    }

    #[test]
    fn add_mention_is_identity_at_cap() {
        let mut rng = StdRng::seed_from_u64(7);
        let s = "@a @b @c all make good points.";
        assert_eq!(add_mention(s, "@dave", 3, &mut rng), s);
    }

    #[test]
    fn add_mention_inserts_token() {
        let mut rng = StdRng::seed_from_u64(7);
        let out = add_mention("That seems right to me.", "@alice", 3, &mut rng);
        assert!(out.contains("@alice"));
        assert!(out.contains("That seems right to me."));
    }

    #[test]
    fn limit_keeps_first_unique_and_demotes_rest() {
        let out = limit_mentions("@a hi @b and @c plus @a again", 2);
        assert_eq!(out, "@a hi @b and c plus @a again");
    }

    #[test]
    fn limit_is_idempotent() {
        let s = "@a @b @c @d";
        let once = limit_mentions(s, 2);
        assert_eq!(limit_mentions(&once, 2), once);
    }

    #[test]
    fn limit_leaves_bare_at_alone() {
        assert_eq!(limit_mentions("meet @ noon", 1), "meet @ noon");
    }
}

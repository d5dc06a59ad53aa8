use chainpulse_common::Article;

/// Article bodies are truncated before prompting; headlines carry most of
/// the extraction signal and full bodies blow the token budget.
const MAX_BODY_CHARS: usize = 4000;

pub const SYSTEM_PROMPT: &str = "You are an entity extraction engine for crypto news. \
For every delimited article, extract named entities with types and confidence, \
an article-level sentiment, the nucleus entity (the single most central actor \
of the story), all actors with a 1-5 salience rating, up to three key action \
phrases, and a 1-2 sentence narrative summary. Record the result through the \
tool, one entry per article, echoing each article's index.";

/// Build the user prompt for a batch, with per-article delimiters.
pub fn build_batch_prompt(articles: &[&Article]) -> String {
    let mut prompt = String::with_capacity(articles.len() * 512);
    for (index, article) in articles.iter().enumerate() {
        let body: String = article.text.chars().take(MAX_BODY_CHARS).collect();
        prompt.push_str(&format!(
            "=== ARTICLE {index} ===\nTITLE: {}\nSOURCE: {}\nTEXT: {}\n\n",
            article.title, article.source, body
        ));
    }
    prompt.push_str(&format!(
        "Extract entities and narrative data for all {} articles above.",
        articles.len()
    ));
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainpulse_common::NewArticle;
    use chrono::Utc;

    fn article(title: &str, text: &str) -> Article {
        Article::from_new(
            NewArticle {
                url: format!("https://example.com/{title}"),
                title: title.to_string(),
                text: text.to_string(),
                source: "example".to_string(),
                published_at: Utc::now(),
            },
            Utc::now(),
        )
    }

    #[test]
    fn batch_prompt_delimits_each_article() {
        let a = article("First", "alpha");
        let b = article("Second", "beta");
        let prompt = build_batch_prompt(&[&a, &b]);
        assert!(prompt.contains("=== ARTICLE 0 ==="));
        assert!(prompt.contains("=== ARTICLE 1 ==="));
        assert!(prompt.contains("TITLE: First"));
        assert!(prompt.contains("TITLE: Second"));
        assert!(prompt.contains("all 2 articles"));
    }

    #[test]
    fn long_bodies_are_truncated() {
        let a = article("Long", &"x".repeat(20_000));
        let prompt = build_batch_prompt(&[&a]);
        assert!(prompt.len() < 6000);
    }

    #[test]
    fn identical_batches_build_identical_prompts() {
        let a = article("Same", "body");
        assert_eq!(build_batch_prompt(&[&a]), build_batch_prompt(&[&a]));
    }
}

//! 分词与关键词统计
//!
//! 中英文混合分词：含 CJK 字符时使用 jieba-rs，英文按非字母数字字符切分并去掉停用词。
//! 反思阶段用它统计 episode 主题中的高频关键词。

use std::collections::HashMap;
use std::sync::OnceLock;

use jieba_rs::Jieba;

/// 全局 Jieba 实例（延迟初始化）
static JIEBA: OnceLock<Jieba> = OnceLock::new();

fn get_jieba() -> &'static Jieba {
    JIEBA.get_or_init(Jieba::new)
}

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "how", "in", "into", "is",
    "it", "of", "on", "or", "the", "to", "vs", "what", "when", "which", "why", "with",
];

/// 判断字符是否为 CJK（中日韩）字符
fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}' |   // CJK Unified Ideographs
        '\u{3400}'..='\u{4DBF}' |   // Extension A
        '\u{F900}'..='\u{FAFF}' |   // Compatibility Ideographs
        '\u{3040}'..='\u{309F}' |   // Hiragana
        '\u{30A0}'..='\u{30FF}'     // Katakana
    )
}

pub fn contains_cjk(text: &str) -> bool {
    text.chars().any(is_cjk)
}

fn keep_token(token: &str) -> bool {
    let mut chars = token.chars();
    match chars.next() {
        None => false,
        Some(c) if is_cjk(c) => true,
        Some(c) => {
            (c.is_alphanumeric() && token.chars().count() > 1) && !STOP_WORDS.contains(&token)
        }
    }
}

/// 分词：统一小写，去掉标点、单字符英文词与停用词
pub fn tokenize(text: &str) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }

    let raw: Vec<String> = if contains_cjk(text) {
        get_jieba()
            .cut_for_search(text, true)
            .into_iter()
            .map(|s| s.trim().to_lowercase())
            .collect()
    } else {
        text.split(|c: char| !(c.is_alphanumeric() || c == '-' || c == '_'))
            .map(|s| s.trim_matches('-').to_lowercase())
            .collect()
    };

    raw.into_iter().filter(|t| keep_token(t)).collect()
}

/// 统计一组文本中的关键词频次；同一文本内重复只计一次。
/// 结果按频次降序、同频按字典序排列。
pub fn keyword_counts<'a, I>(texts: I) -> Vec<(String, usize)>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut counts: HashMap<String, usize> = HashMap::new();
    for text in texts {
        let mut seen: Vec<String> = Vec::new();
        for token in tokenize(text) {
            if !seen.contains(&token) {
                *counts.entry(token.clone()).or_insert(0) += 1;
                seen.push(token);
            }
        }
    }
    let mut out: Vec<(String, usize)> = counts.into_iter().collect();
    out.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    out
}

/// 出现次数不少于 min_occurrences 的关键词
pub fn recurring_keywords<'a, I>(texts: I, min_occurrences: usize) -> Vec<(String, usize)>
where
    I: IntoIterator<Item = &'a str>,
{
    keyword_counts(texts)
        .into_iter()
        .filter(|(_, n)| *n >= min_occurrences)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_english_drops_stop_words() {
        let tokens = tokenize("The history of Rust, and its borrow-checker!");
        assert_eq!(tokens, vec!["history", "rust", "its", "borrow-checker"]);
    }

    #[test]
    fn test_tokenize_chinese() {
        let tokens = tokenize("我喜欢编程和人工智能");
        assert!(tokens
            .iter()
            .any(|t| t.contains("编程") || t.contains("人工") || t.contains("智能")));
    }

    #[test]
    fn test_contains_cjk() {
        assert!(contains_cjk("Hello 世界"));
        assert!(!contains_cjk("Hello World"));
    }

    #[test]
    fn test_keyword_counts_once_per_text() {
        let topics = ["rust async rust", "rust memory", "python memory"];
        let counts = keyword_counts(topics.iter().copied());
        assert_eq!(counts[0], ("memory".to_string(), 2));
        assert_eq!(counts[1], ("rust".to_string(), 2));
    }

    #[test]
    fn test_recurring_keywords_threshold() {
        let topics = ["vector databases", "vector search", "graph search", "llm"];
        let r = recurring_keywords(topics.iter().copied(), 2);
        let words: Vec<&str> = r.iter().map(|(w, _)| w.as_str()).collect();
        assert_eq!(words, vec!["search", "vector"]);
    }
}

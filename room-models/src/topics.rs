use rand::seq::SliceRandom;

/// 回合主题
pub const TOPICS: [&str; 5] = [
    "Top 10 des meilleurs films de tous les temps",
    "Top 10 des destinations de voyage à visiter absolument",
    "Top 10 des plats français les plus délicieux",
    "Top 10 des inventions qui ont changé le monde",
    "Top 10 des livres à lire avant de mourir",
];

pub fn topic() -> &'static str {
    TOPICS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(TOPICS[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_comes_from_the_list() {
        for _ in 0..20 {
            assert!(TOPICS.contains(&topic()));
        }
    }
}

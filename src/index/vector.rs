//! 向量相似度检索

/// 余弦相似度；维度不一致或为空时返回 None
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.is_empty() || a.len() != b.len() {
        return None;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return Some(0.0);
    }

    Some(dot_product / (norm_a * norm_b))
}

/// 对候选集按余弦相似度降序取前 k 个
///
/// 缺少嵌入或维度不匹配的候选直接丢弃。
pub fn rank_top_k<'a, T, I>(query: &[f32], candidates: I, k: usize) -> Vec<(T, f32)>
where
    I: IntoIterator<Item = (T, Option<&'a [f32]>)>,
{
    if k == 0 {
        return Vec::new();
    }

    let mut scored: Vec<(T, f32)> = candidates
        .into_iter()
        .filter_map(|(item, embedding)| {
            let embedding = embedding?;
            let score = cosine_similarity(query, embedding)?;
            if score.is_nan() {
                return None;
            }
            Some((item, score))
        })
        .collect();

    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored.truncate(k);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        let c = vec![0.0, 1.0, 0.0];

        assert_eq!(cosine_similarity(&a, &b), Some(1.0));
        assert_eq!(cosine_similarity(&a, &c), Some(0.0));
        assert_eq!(cosine_similarity(&a, &[1.0, 0.0]), None);
        assert_eq!(cosine_similarity(&[], &[]), None);
    }

    #[test]
    fn test_rank_top_k_sorts_and_truncates() {
        let query = vec![1.0, 0.0];
        let e1 = vec![1.0, 0.0];
        let e2 = vec![0.7, 0.7];
        let e3 = vec![0.0, 1.0];
        let wrong_dim = vec![1.0, 0.0, 0.0];

        let candidates = vec![
            ("orthogonal", Some(e3.as_slice())),
            ("missing", None),
            ("exact", Some(e1.as_slice())),
            ("mismatched", Some(wrong_dim.as_slice())),
            ("diagonal", Some(e2.as_slice())),
        ];

        let ranked = rank_top_k(&query, candidates, 2);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].0, "exact");
        assert_eq!(ranked[1].0, "diagonal");
        assert!(ranked[0].1 >= ranked[1].1);
    }

    #[test]
    fn test_rank_top_k_excludes_mismatched_dimensions() {
        let query = vec![1.0, 0.0];
        let wrong_dim = vec![1.0, 0.0, 0.0];
        let ranked = rank_top_k(&query, vec![("x", Some(wrong_dim.as_slice()))], 5);
        assert!(ranked.is_empty());
    }
}

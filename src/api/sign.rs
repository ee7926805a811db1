//! 开放平台签名算法
//!
//! 参数按键名排序后拼接为 key1value1key2value2...，
//! 两端包上 client_secret，取 MD5 大写十六进制。

use std::collections::BTreeMap;

/// 计算请求签名
pub fn sign_params(params: &BTreeMap<String, String>, client_secret: &str) -> String {
    let mut base = String::with_capacity(client_secret.len() * 2 + 64);
    base.push_str(client_secret);
    // BTreeMap 迭代天然按键排序
    for (key, value) in params {
        base.push_str(key);
        base.push_str(value);
    }
    base.push_str(client_secret);
    hex::encode_upper(md5::compute(base.as_bytes()).0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_sign_is_uppercase_md5() {
        let sign = sign_params(&params(&[("type", "test")]), "secret");
        assert_eq!(sign.len(), 32);
        assert_eq!(sign, sign.to_uppercase());
    }

    #[test]
    fn test_sign_is_order_independent() {
        // 签名基于排序后的键，插入顺序不影响结果
        let a = sign_params(&params(&[("b", "2"), ("a", "1")]), "s");
        let b = sign_params(&params(&[("a", "1"), ("b", "2")]), "s");
        assert_eq!(a, b);
    }

    #[test]
    fn test_sign_depends_on_secret() {
        let p = params(&[("a", "1")]);
        assert_ne!(sign_params(&p, "s1"), sign_params(&p, "s2"));
    }

    #[test]
    fn test_known_digest() {
        // secret + "a1" + secret = "sa1s"
        let expected = hex::encode_upper(md5::compute(b"sa1s").0);
        assert_eq!(sign_params(&params(&[("a", "1")]), "s"), expected);
    }
}

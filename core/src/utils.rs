//! 工具函数模块

/// 验证标识符（表名、字段名）是否安全：非空，且只包含 ASCII 字母、数字和下划线，不以数字开头
pub fn is_safe_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

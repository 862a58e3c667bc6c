//! 软件后端的 GLSL 检查器
//!
//! 不生成代码，只模拟驱动编译器前端最常见的报错：
//! 条件编译（`#ifdef`/`#ifndef`/`#if`/`#elif`/`#else`/`#endif`）、
//! `#define`/`#undef`、`#error`、`#version` 位置、花括号配对和 `main` 入口。
//! 报错格式模仿常见驱动的 `ERROR: 0:<行>: ...`。

use std::collections::HashSet;

/// 条件编译栈的一层
struct Conditional {
    /// 外层是否处于激活状态
    parent_active: bool,
    /// 本组是否已经有分支被选中
    taken: bool,
    /// 当前分支是否激活
    active: bool,
}

/// 检查源码，失败时返回诊断日志
pub(crate) fn check_source(source: &str) -> Result<(), String> {
    let mut errors = Vec::new();
    let mut defines: HashSet<String> = HashSet::new();
    let mut stack: Vec<Conditional> = Vec::new();
    let mut in_block_comment = false;
    let mut seen_statement = false;
    let mut brace_depth: i64 = 0;
    let mut has_main = false;
    let mut last_line = 0;

    for (index, raw_line) in source.lines().enumerate() {
        let line_no = index + 1;
        last_line = line_no;

        let visible = strip_comments(raw_line, &mut in_block_comment);
        let trimmed = visible.trim();
        if trimmed.is_empty() {
            continue;
        }

        let active = stack.last().map_or(true, |c| c.active);

        if let Some(directive) = trimmed.strip_prefix('#') {
            let (keyword, rest) = split_word(directive.trim_start());
            match keyword {
                "ifdef" => push_conditional(&mut stack, active, defines.contains(first_word(rest))),
                "ifndef" => push_conditional(&mut stack, active, !defines.contains(first_word(rest))),
                "if" => push_conditional(&mut stack, active, eval_condition(rest, &defines)),
                "elif" => match stack.last_mut() {
                    Some(c) => {
                        c.active = c.parent_active && !c.taken && eval_condition(rest, &defines);
                        c.taken |= c.active;
                    }
                    None => errors.push(format!("ERROR: 0:{}: '#elif' : #elif without #if", line_no)),
                },
                "else" => match stack.last_mut() {
                    Some(c) => {
                        c.active = c.parent_active && !c.taken;
                        c.taken = true;
                    }
                    None => errors.push(format!("ERROR: 0:{}: '#else' : #else without #if", line_no)),
                },
                "endif" => {
                    if stack.pop().is_none() {
                        errors.push(format!("ERROR: 0:{}: '#endif' : #endif without #if", line_no));
                    }
                }
                _ if !active => {}
                "version" => {
                    if seen_statement {
                        errors.push(format!(
                            "ERROR: 0:{}: '#version' : must occur first in shader",
                            line_no
                        ));
                    }
                }
                "define" => {
                    defines.insert(first_word(rest).to_string());
                }
                "undef" => {
                    defines.remove(first_word(rest));
                }
                "error" => errors.push(format!("ERROR: 0:{}: '#error' : {}", line_no, rest.trim())),
                _ => {}
            }
            seen_statement = true;
            continue;
        }

        seen_statement = true;
        if !active {
            continue;
        }

        if trimmed.contains("void main(") {
            has_main = true;
        }

        for ch in trimmed.chars() {
            match ch {
                '{' => brace_depth += 1,
                '}' => {
                    brace_depth -= 1;
                    if brace_depth < 0 {
                        errors.push(format!("ERROR: 0:{}: '}}' : syntax error", line_no));
                        brace_depth = 0;
                    }
                }
                _ => {}
            }
        }
    }

    if !stack.is_empty() {
        errors.push(format!("ERROR: 0:{}: '' : missing #endif", last_line));
    }
    if brace_depth > 0 {
        errors.push(format!("ERROR: 0:{}: '' : unexpected end of file", last_line));
    }
    if !has_main {
        errors.push("ERROR: 0:0: '' : missing entry point 'main'".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join("\n"))
    }
}

fn push_conditional(stack: &mut Vec<Conditional>, parent_active: bool, condition: bool) {
    let active = parent_active && condition;
    stack.push(Conditional {
        parent_active,
        taken: active,
        active,
    });
}

/// 只支持 `0`、`1`、`defined(X)`、`defined X`、`!defined(X)` 和裸宏名
fn eval_condition(expr: &str, defines: &HashSet<String>) -> bool {
    let expr = expr.trim();
    if let Some(inner) = expr.strip_prefix('!') {
        return !eval_condition(inner, defines);
    }
    if let Some(rest) = expr.strip_prefix("defined") {
        let name = rest.trim().trim_start_matches('(').trim_end_matches(')').trim();
        return defines.contains(name);
    }
    match expr.parse::<i64>() {
        Ok(value) => value != 0,
        Err(_) => defines.contains(expr),
    }
}

fn split_word(text: &str) -> (&str, &str) {
    match text.find(char::is_whitespace) {
        Some(pos) => (&text[..pos], &text[pos..]),
        None => (text, ""),
    }
}

fn first_word(text: &str) -> &str {
    split_word(text.trim_start()).0
}

/// 去掉行注释和块注释，块注释状态跨行保留
fn strip_comments(line: &str, in_block: &mut bool) -> String {
    let mut out = String::with_capacity(line.len());
    let bytes = line.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if *in_block {
            if bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/') {
                *in_block = false;
                i += 2;
            } else {
                i += 1;
            }
            continue;
        }
        if bytes[i] == b'/' && bytes.get(i + 1) == Some(&b'/') {
            break;
        }
        if bytes[i] == b'/' && bytes.get(i + 1) == Some(&b'*') {
            *in_block = true;
            i += 2;
            continue;
        }
        // 逐字节前进，只在 ASCII 边界上切分
        let ch_len = line[i..].chars().next().map_or(1, char::len_utf8);
        out.push_str(&line[i..i + ch_len]);
        i += ch_len;
    }
    out
}

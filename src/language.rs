/// Language detection for submitted source text.
///
/// Pure heuristics: a shebang line wins outright, otherwise the first
/// matching token rule in precedence order (python, c/cpp, java, shell)
/// decides. Total and deterministic; unknown input yields
/// `Language::Unknown` rather than an error.
use crate::types::Language;

/// Classify raw submitted text into a supported language tag.
pub fn detect(text: &str) -> Language {
    let content = text.trim();

    if content.starts_with("#!/bin/bash") || content.starts_with("#!/bin/sh") {
        return Language::Shell;
    }
    if content.starts_with("#!/usr/bin/python") || content.starts_with("#!/usr/bin/env python") {
        return Language::Python;
    }

    if ["import ", "def ", "print(", "if __name__"]
        .iter()
        .any(|kw| content.contains(kw))
    {
        return Language::Python;
    }

    if ["#include", "int main", "printf", "cout"]
        .iter()
        .any(|kw| content.contains(kw))
    {
        // std:: or cout disambiguates C++ from C
        return if content.contains("cout") || content.contains("std::") {
            Language::Cpp
        } else {
            Language::C
        };
    }

    if ["public class", "public static void main", "System.out"]
        .iter()
        .any(|kw| content.contains(kw))
    {
        return Language::Java;
    }

    if ["echo", "cd ", "ls ", "mkdir"]
        .iter()
        .any(|kw| content.contains(kw))
    {
        return Language::Shell;
    }

    Language::Unknown
}

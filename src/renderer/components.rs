//! Lookup tables shared by every output format.

/// Heading for a section kind. An empty title means the entries are listed
/// without a heading of their own.
pub fn section_title(kind: &str) -> &'static str {
    match kind {
        "public-func" => "Methods",
        "public-attrib" => "Fields",
        "public-static-func" => "Static Methods",
        "public-static-attrib" => "Static Fields",
        "protected-func" => "Protected Methods",
        "protected-attrib" => "Protected Fields",
        "protected-static-func" => "Protected Static Methods",
        "protected-static-attrib" => "Protected Static Fields",
        "package-func" => "Package Methods",
        "package-attrib" => "Package Fields",
        "package-static-func" => "Package Static Methods",
        "package-static-attrib" => "Package Static Fields",
        "private-func" => "Private Methods",
        "private-attrib" => "Private Fields",
        "private-static-func" => "Private Static Methods",
        "private-static-attrib" => "Private Static Fields",
        "define" => "Macros",
        "typedef" => "Typedefs",
        "enum" => "Enums",
        "func" => "Functions",
        // Nested compounds, gathered by the formatter.
        "innerclass" => "Data Structures",
        // user-defined, public-type, slots, signals, var, friend, ...
        _ => "",
    }
}

/// How a record kind qualifies its name. `%s` marks where the name goes;
/// otherwise the title is prefixed with a space. Empty means the bare name.
pub fn kind_title(kind: &str) -> &'static str {
    match kind {
        "class" => "class",
        "struct" => "struct",
        "union" => "union",
        "interface" => "interface",
        "protocol" => "protocol",
        "category" => "category",
        "typedef" => "typedef",
        "enum" => "enum",
        "function" | "FUNCTION-MACRO" => "%s()",
        _ => "",
    }
}

/// `name` qualified by the title of `kind`.
pub fn qualified_name(kind: &str, name: &str) -> String {
    let title = kind_title(kind);
    if title.contains("%s") {
        title.replacen("%s", name, 1)
    } else {
        [title, name]
            .iter()
            .filter(|part| !part.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Output file stem for a source path: `_` doubles, `:` is dropped, path
/// separators become `_`.
pub fn output_stem(path: &str) -> String {
    let mut stem = String::with_capacity(path.len() + 8);
    for c in path.chars() {
        match c {
            '_' => stem.push_str("__"),
            ':' => {}
            '/' | '\\' => stem.push('_'),
            _ => stem.push(c),
        }
    }
    stem
}

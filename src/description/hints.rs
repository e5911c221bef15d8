pub(crate) const YAML_HINTS: [(&str, &str); 6] = [
    (
        "did not find expected '-'",
        "Start list items with '-' and ensure proper indentation.",
    ),
    (
        "expected ':'",
        "Ensure each key is followed by ':' separating key and value.",
    ),
    (
        "mapping values are not allowed",
        "Check for a stray ':' or add quotes around values where needed.",
    ),
    (
        "found character that cannot start any token",
        "Remove stray characters and ensure indentation uses spaces (no tabs).",
    ),
    (
        "unknown field",
        "Targets accept name, kind, sources, link_with, objects and dependencies.",
    ),
    (
        "unknown variant",
        "Use one of static_library, shared_library or executable for `kind`.",
    ),
];

//! Block-to-markup codec.
//!
//! Pure mapping from the typed block vocabulary to Gutenberg block
//! markup. Every supported type produces non-empty markup containing its
//! literal content; unrecognized types are coerced to a paragraph so the
//! codec is total over its input.

use pressforge_core::{Block, BlockKind};

/// Encodes one block to Gutenberg markup.
pub fn encode_block(block: &Block) -> String {
    match block.kind {
        BlockKind::Hero => encode_hero(block),
        BlockKind::Heading => encode_heading(block),
        BlockKind::Paragraph | BlockKind::Unknown => encode_paragraph(&block.text),
        BlockKind::Features => encode_features(block),
        BlockKind::Cta => encode_cta(block),
        BlockKind::Image => encode_image(block),
        BlockKind::Gallery => encode_gallery(block),
    }
}

/// Encodes an ordered block list to one markup document.
pub fn encode_blocks(blocks: &[Block]) -> String {
    blocks
        .iter()
        .map(encode_block)
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn encode_hero(block: &Block) -> String {
    let subtitle = block
        .attributes
        .get("subtitle")
        .map(|s| {
            format!(
                "\n<!-- wp:paragraph {{\"align\":\"center\"}} -->\n<p class=\"has-text-align-center\">{}</p>\n<!-- /wp:paragraph -->",
                escape_html(s)
            )
        })
        .unwrap_or_default();
    format!(
        "<!-- wp:cover {{\"dimRatio\":50}} -->\n<div class=\"wp-block-cover\"><div class=\"wp-block-cover__inner-container\">\n<!-- wp:heading {{\"textAlign\":\"center\",\"level\":1}} -->\n<h1 class=\"has-text-align-center\">{}</h1>\n<!-- /wp:heading -->{}\n</div></div>\n<!-- /wp:cover -->",
        escape_html(&block.text),
        subtitle,
    )
}

fn encode_heading(block: &Block) -> String {
    let level = block
        .attributes
        .get("level")
        .and_then(|l| l.parse::<u8>().ok())
        .filter(|l| (1..=6).contains(l))
        .unwrap_or(2);
    format!(
        "<!-- wp:heading {{\"level\":{level}}} -->\n<h{level}>{}</h{level}>\n<!-- /wp:heading -->",
        escape_html(&block.text),
    )
}

fn encode_paragraph(text: &str) -> String {
    format!(
        "<!-- wp:paragraph -->\n<p>{}</p>\n<!-- /wp:paragraph -->",
        escape_html(text),
    )
}

fn encode_features(block: &Block) -> String {
    // Feature items arrive pipe-separated in the "items" attribute.
    let items: Vec<&str> = block
        .attributes
        .get("items")
        .map(|s| s.split('|').map(str::trim).filter(|i| !i.is_empty()).collect())
        .unwrap_or_default();

    let columns = if items.is_empty() {
        format!(
            "<!-- wp:column -->\n<div class=\"wp-block-column\">\n{}\n</div>\n<!-- /wp:column -->",
            encode_paragraph(&block.text),
        )
    } else {
        items
            .iter()
            .map(|item| {
                format!(
                    "<!-- wp:column -->\n<div class=\"wp-block-column\">\n{}\n</div>\n<!-- /wp:column -->",
                    encode_paragraph(item),
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    let heading = if block.text.is_empty() {
        String::new()
    } else {
        format!("{}\n", encode_heading(&Block::text(BlockKind::Heading, block.text.clone())))
    };

    format!(
        "{heading}<!-- wp:columns -->\n<div class=\"wp-block-columns\">\n{columns}\n</div>\n<!-- /wp:columns -->",
    )
}

fn encode_cta(block: &Block) -> String {
    let url = block
        .attributes
        .get("url")
        .map(String::as_str)
        .unwrap_or("#");
    format!(
        "<!-- wp:buttons {{\"layout\":{{\"type\":\"flex\",\"justifyContent\":\"center\"}}}} -->\n<div class=\"wp-block-buttons\">\n<!-- wp:button -->\n<div class=\"wp-block-button\"><a class=\"wp-block-button__link\" href=\"{}\">{}</a></div>\n<!-- /wp:button -->\n</div>\n<!-- /wp:buttons -->",
        escape_html(url),
        escape_html(&block.text),
    )
}

fn encode_image(block: &Block) -> String {
    let url = block
        .attributes
        .get("url")
        .map(String::as_str)
        .unwrap_or_default();
    format!(
        "<!-- wp:image -->\n<figure class=\"wp-block-image\"><img src=\"{}\" alt=\"{}\"/></figure>\n<!-- /wp:image -->",
        escape_html(url),
        escape_html(&block.text),
    )
}

fn encode_gallery(block: &Block) -> String {
    let urls: Vec<&str> = block
        .attributes
        .get("urls")
        .map(|s| s.split('|').map(str::trim).filter(|u| !u.is_empty()).collect())
        .unwrap_or_default();
    let images = urls
        .iter()
        .map(|url| {
            format!(
                "<!-- wp:image -->\n<figure class=\"wp-block-image\"><img src=\"{}\" alt=\"{}\"/></figure>\n<!-- /wp:image -->",
                escape_html(url),
                escape_html(&block.text),
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "<!-- wp:gallery -->\n<figure class=\"wp-block-gallery\">\n{images}\n</figure>\n<!-- /wp:gallery -->",
    )
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

//! The HAVE / NEED / DEAL protocol agents speak on the marketplace chat
//! channel (spec.md §4.6). Parsing and formatting only; the transport never
//! interprets these lines semantically.

pub const PROTOCOL_CHANNEL: &str = "marketplace";

/// One parsed announcement from the marketplace channel. `Unknown` is kept
/// rather than discarded so callers can log/ignore unrecognized chatter
/// without the parser itself failing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MarketplaceAnnouncement {
    Have {
        product: String,
        price_usdc: String,
        description: String,
    },
    Need {
        product: String,
        budget_usdc: String,
        contact_hint: String,
    },
    Deal {
        buyer: String,
        seller: String,
        product: String,
        price_usdc: String,
    },
    Unknown(String),
}

impl MarketplaceAnnouncement {
    pub fn format(&self) -> String {
        match self {
            MarketplaceAnnouncement::Have {
                product,
                price_usdc,
                description,
            } => format!("HAVE: {product} | ${price_usdc} USDC | {description}"),
            MarketplaceAnnouncement::Need {
                product,
                budget_usdc,
                contact_hint,
            } => format!("NEED: {product} | Budget: ${budget_usdc} USDC | {contact_hint}"),
            MarketplaceAnnouncement::Deal {
                buyer,
                seller,
                product,
                price_usdc,
            } => format!("DEAL: {buyer} <-> {seller} | {product} | ${price_usdc}"),
            MarketplaceAnnouncement::Unknown(line) => line.clone(),
        }
    }

    pub fn parse(line: &str) -> MarketplaceAnnouncement {
        let parts: Vec<&str> = line.splitn(2, ':').collect();
        let (tag, rest) = match parts.as_slice() {
            [tag, rest] => (tag.trim(), rest.trim()),
            _ => return MarketplaceAnnouncement::Unknown(line.to_string()),
        };

        let fields: Vec<&str> = rest.split('|').map(str::trim).collect();

        match tag {
            "HAVE" if fields.len() == 3 => MarketplaceAnnouncement::Have {
                product: fields[0].to_string(),
                price_usdc: strip_usdc_price(fields[1]),
                description: fields[2].to_string(),
            },
            "NEED" if fields.len() == 3 => MarketplaceAnnouncement::Need {
                product: fields[0].to_string(),
                budget_usdc: strip_budget(fields[1]),
                contact_hint: fields[2].to_string(),
            },
            "DEAL" if fields.len() == 3 => {
                let Some((buyer, seller)) = fields[0].split_once("<->") else {
                    return MarketplaceAnnouncement::Unknown(line.to_string());
                };
                MarketplaceAnnouncement::Deal {
                    buyer: buyer.trim().to_string(),
                    seller: seller.trim().to_string(),
                    product: fields[1].to_string(),
                    price_usdc: strip_usdc_price(fields[2]),
                }
            }
            _ => MarketplaceAnnouncement::Unknown(line.to_string()),
        }
    }
}

fn strip_usdc_price(field: &str) -> String {
    field
        .trim_start_matches('$')
        .trim_end_matches("USDC")
        .trim()
        .to_string()
}

fn strip_budget(field: &str) -> String {
    field
        .trim_start_matches("Budget:")
        .trim()
        .trim_start_matches('$')
        .trim_end_matches("USDC")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_and_parses_have() {
        let announcement = MarketplaceAnnouncement::Have {
            product: "raw_logs".into(),
            price_usdc: "2.50".into(),
            description: "scraped chat transcripts".into(),
        };
        let line = announcement.format();
        assert_eq!(line, "HAVE: raw_logs | $2.50 USDC | scraped chat transcripts");
        assert_eq!(MarketplaceAnnouncement::parse(&line), announcement);
    }

    #[test]
    fn formats_and_parses_need() {
        let announcement = MarketplaceAnnouncement::Need {
            product: "skill_profile".into(),
            budget_usdc: "5.00".into(),
            contact_hint: "dm @buyer-01".into(),
        };
        let line = announcement.format();
        assert_eq!(
            line,
            "NEED: skill_profile | Budget: $5.00 USDC | dm @buyer-01"
        );
        assert_eq!(MarketplaceAnnouncement::parse(&line), announcement);
    }

    #[test]
    fn formats_and_parses_deal() {
        let announcement = MarketplaceAnnouncement::Deal {
            buyer: "buyer-01".into(),
            seller: "seller-07".into(),
            product: "voice_profile".into(),
            price_usdc: "3.10".into(),
        };
        let line = announcement.format();
        assert_eq!(
            line,
            "DEAL: buyer-01 <-> seller-07 | voice_profile | $3.10"
        );
        assert_eq!(MarketplaceAnnouncement::parse(&line), announcement);
    }

    #[test]
    fn unparseable_line_is_unknown_not_an_error() {
        let parsed = MarketplaceAnnouncement::parse("gm everyone");
        assert_eq!(parsed, MarketplaceAnnouncement::Unknown("gm everyone".into()));
    }
}

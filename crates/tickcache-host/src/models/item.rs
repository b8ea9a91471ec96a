use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Rarity {
    Junk,
    Basic,
    Fine,
    Masterwork,
    Rare,
    Exotic,
    Ascended,
    Legendary,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Item {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub rarity: Rarity,
    #[serde(rename = "type", default)]
    pub item_type: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_rarity_is_tolerated() {
        let item: Item = serde_json::from_str(r#"{"id": 1, "name": "Thing", "rarity": "Mythic"}"#).unwrap();
        assert_eq!(item.rarity, Rarity::Unknown);
        assert_eq!(item.icon, None);
    }
}

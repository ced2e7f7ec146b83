//! ROMレジストリ
//!
//! (class, name) で引けるROMブロブの置き場。メインROM・文字ROM・
//! カードファームウェアを初期化時に登録し、バスとレンダラが参照する。

/// 登録されるROMブロブ
pub struct Rom {
    pub name: String,
    pub class: String,
    pub description: String,
    pub data: Vec<u8>,
}

/// ROMレジストリ本体
#[derive(Default)]
pub struct RomRegistry {
    roms: Vec<Rom>,
}

impl RomRegistry {
    pub fn new() -> Self {
        RomRegistry { roms: Vec::new() }
    }

    /// ROMを登録する。同じ(class, name)があれば置き換える。
    pub fn register(&mut self, class: &str, name: &str, description: &str, data: Vec<u8>) {
        if let Some(existing) = self
            .roms
            .iter_mut()
            .find(|r| r.class == class && r.name == name)
        {
            log::info!("rom: replacing {}/{} ({} bytes)", class, name, data.len());
            existing.data = data;
            existing.description = description.to_string();
            return;
        }
        log::info!("rom: registered {}/{} ({} bytes)", class, name, data.len());
        self.roms.push(Rom {
            name: name.to_string(),
            class: class.to_string(),
            description: description.to_string(),
            data,
        });
    }

    /// (class, name) でROMを検索する
    pub fn get(&self, class: &str, name: &str) -> Option<&Rom> {
        self.roms.iter().find(|r| r.class == class && r.name == name)
    }

    /// クラス内の全ROMを列挙する
    pub fn list<'a>(&'a self, class: &'a str) -> impl Iterator<Item = &'a Rom> + 'a {
        self.roms.iter().filter(move |r| r.class == class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_lookup() {
        let mut reg = RomRegistry::new();
        reg.register("main", "iiee", "Apple IIe Enhanced ROM", vec![0u8; 16384]);
        reg.register("video", "iiee_video", "Apple IIe Video ROM", vec![0u8; 4096]);
        assert!(reg.get("main", "iiee").is_some());
        assert!(reg.get("main", "iiee_video").is_none());
        assert_eq!(reg.list("video").count(), 1);
    }

    #[test]
    fn re_register_replaces() {
        let mut reg = RomRegistry::new();
        reg.register("card", "disk2", "P5", vec![0u8; 256]);
        reg.register("card", "disk2", "P5 v2", vec![1u8; 256]);
        assert_eq!(reg.list("card").count(), 1);
        assert_eq!(reg.get("card", "disk2").unwrap().data[0], 1);
    }
}

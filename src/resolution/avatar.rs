//! Avatar images for resolved names.
//!
//! Remote avatars come from the ENS `avatar` text record. Everything else gets a
//! locally generated blockie, the 8x8 mirrored identicon wallets show for addresses.

use alloy::primitives::Address;
use async_trait::async_trait;
use core::fmt;
use std::sync::Arc;
use url::Url;

use super::ens::EnsResolver;
use crate::utils::address::lowercase_hex;

const BLOCKIE_SIZE: usize = 8;
const IPFS_GATEWAY: &str = "https://ipfs.io/ipfs/";

#[derive(Debug, Clone, PartialEq)]
pub enum AvatarImage {
    Blockie(Blockie),
    Remote(Url),
}

/// Best-effort avatar source. `None` means "no image", never an error.
#[async_trait]
pub trait AvatarGenerator: Send + Sync {
    async fn generate(&self, address: Address, name: Option<&str>) -> Option<AvatarImage>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hsl {
    pub hue: f64,
    pub saturation: f64,
    pub lightness: f64,
}

impl fmt::Display for Hsl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hsl({},{:.2}%,{:.2}%)",
            self.hue, self.saturation, self.lightness
        )
    }
}

/// Cell values: 0 background, 1 foreground, 2 spot.
#[derive(Debug, Clone, PartialEq)]
pub struct Blockie {
    pub size: usize,
    pub color: Hsl,
    pub background: Hsl,
    pub spot: Hsl,
    pub cells: Vec<u8>,
}

/// xorshift generator seeded from the address string
struct BlockieRng {
    state: [i32; 4],
}

impl BlockieRng {
    fn new(seed: &str) -> Self {
        let mut state = [0i32; 4];
        for (i, byte) in seed.bytes().enumerate() {
            let slot = &mut state[i % 4];
            *slot = (*slot << 5).wrapping_sub(*slot).wrapping_add(i32::from(byte));
        }
        Self { state }
    }

    fn next(&mut self) -> f64 {
        let t = self.state[0] ^ (self.state[0] << 11);
        self.state[0] = self.state[1];
        self.state[1] = self.state[2];
        self.state[2] = self.state[3];
        self.state[3] = self.state[3] ^ (self.state[3] >> 19) ^ t ^ (t >> 8);
        // reinterpret as unsigned, scaled by 2^31
        f64::from(self.state[3] as u32) / f64::from(1u32 << 31)
    }

    fn color(&mut self) -> Hsl {
        let hue = (self.next() * 360.0).floor();
        let saturation = self.next().mul_add(60.0, 40.0);
        let lightness = (self.next() + self.next() + self.next() + self.next()) * 25.0;
        Hsl {
            hue,
            saturation,
            lightness,
        }
    }
}

impl Blockie {
    pub fn for_address(address: &Address) -> Self {
        Self::from_seed(&lowercase_hex(address), BLOCKIE_SIZE)
    }

    pub fn from_seed(seed: &str, size: usize) -> Self {
        let mut rng = BlockieRng::new(seed);
        let color = rng.color();
        let background = rng.color();
        let spot = rng.color();

        let data_width = size.div_ceil(2);
        let mirror_width = size - data_width;
        let mut cells = Vec::with_capacity(size * size);
        for _ in 0..size {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let row: Vec<u8> = (0..data_width)
                .map(|_| (rng.next() * 2.3).floor() as u8)
                .collect();
            cells.extend_from_slice(&row);
            cells.extend(row[..mirror_width].iter().rev());
        }

        Self {
            size,
            color,
            background,
            spot,
            cells,
        }
    }

    pub fn cell(&self, x: usize, y: usize) -> u8 {
        self.cells[y * self.size + x]
    }

    /// Renders the blockie as an SVG document with `scale` pixels per cell.
    pub fn to_svg(&self, scale: usize) -> String {
        let side = self.size * scale;
        let mut svg = format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{side}" height="{side}"><rect width="{side}" height="{side}" fill="{}"/>"#,
            self.background
        );
        for (i, cell) in self.cells.iter().enumerate() {
            let fill = match *cell {
                1 => self.color,
                2 => self.spot,
                _ => continue,
            };
            let (x, y) = ((i % self.size) * scale, (i / self.size) * scale);
            svg.push_str(&format!(
                r#"<rect x="{x}" y="{y}" width="{scale}" height="{scale}" fill="{fill}"/>"#
            ));
        }
        svg.push_str("</svg>");
        svg
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BlockieAvatars;

#[async_trait]
impl AvatarGenerator for BlockieAvatars {
    async fn generate(&self, address: Address, _name: Option<&str>) -> Option<AvatarImage> {
        Some(AvatarImage::Blockie(Blockie::for_address(&address)))
    }
}

/// ENS avatar record when one is set and usable, blockie otherwise.
pub struct EnsAvatars {
    ens: Arc<EnsResolver>,
}

impl EnsAvatars {
    pub const fn new(ens: Arc<EnsResolver>) -> Self {
        Self { ens }
    }
}

/// Maps an avatar record to a fetchable URL. NFT references (`eip155:`) are not fetched.
fn avatar_url(record: &str) -> Option<Url> {
    if let Some(path) = record.strip_prefix("ipfs://") {
        let path = path.trim_start_matches("ipfs/");
        return Url::parse(&format!("{IPFS_GATEWAY}{path}")).ok();
    }
    Url::parse(record)
        .ok()
        .filter(|url| matches!(url.scheme(), "http" | "https"))
}

#[async_trait]
impl AvatarGenerator for EnsAvatars {
    async fn generate(&self, address: Address, name: Option<&str>) -> Option<AvatarImage> {
        if let Some(name) = name.filter(|name| name.ends_with(".eth")) {
            match self.ens.avatar(name).await {
                Ok(Some(record)) => {
                    if let Some(url) = avatar_url(&record) {
                        return Some(AvatarImage::Remote(url));
                    }
                    log::debug!("resolution::avatar: unsupported avatar record for {name}: {record}");
                }
                Ok(None) => {}
                Err(e) => log::debug!("resolution::avatar: avatar lookup for {name} failed: {e}"),
            }
        }
        BlockieAvatars.generate(address, name).await
    }
}

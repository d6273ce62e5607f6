//! Currently-playing payloads and the text that gets posted.

use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlayerState {
    #[serde(default)]
    pub currently_playing_type: String,
    #[serde(default)]
    pub item: Option<PlayingItem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlayingItem {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub artists: Vec<Artist>,
    #[serde(default)]
    pub show: Option<Show>,
    #[serde(default)]
    pub external_urls: ExternalUrls,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Artist {
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Show {
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExternalUrls {
    #[serde(default)]
    pub spotify: String,
}

/// Something worth posting about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NowPlaying {
    Track {
        title: String,
        artists: String,
        url: String,
    },
    Episode {
        title: String,
        show: String,
        url: String,
    },
}

impl PlayerState {
    /// Tracks and podcast episodes are shareable; ads and unknown types are not.
    pub fn now_playing(&self) -> Option<NowPlaying> {
        let item = self.item.as_ref()?;
        match self.currently_playing_type.as_str() {
            "track" => Some(NowPlaying::Track {
                title: item.name.clone(),
                artists: item
                    .artists
                    .iter()
                    .map(|a| a.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
                url: item.external_urls.spotify.clone(),
            }),
            "episode" => Some(NowPlaying::Episode {
                title: item.name.clone(),
                show: item.show.as_ref().map(|s| s.name.clone()).unwrap_or_default(),
                url: item.external_urls.spotify.clone(),
            }),
            _ => None,
        }
    }
}

impl NowPlaying {
    pub fn share_text(&self) -> String {
        match self {
            NowPlaying::Track {
                title,
                artists,
                url,
            } => format!("{title} / {artists}\n#NowPlaying #PsrPlaying\n{url}"),
            NowPlaying::Episode { title, show, url } => {
                format!("{title} / {show}\n#NowPlaying\n{url}")
            }
        }
    }
}

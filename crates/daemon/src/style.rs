//! Listing presentation style.

/// How directory pages are laid out.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ListingStyle {
    /// An HTML table with alternating row shading.
    #[default]
    Table,
    /// Preformatted text with dotted leaders.
    Plain,
}

impl ListingStyle {
    /// The other style.
    #[must_use]
    pub const fn toggled(self) -> Self {
        match self {
            Self::Table => Self::Plain,
            Self::Plain => Self::Table,
        }
    }

    /// Returns `true` for [`ListingStyle::Plain`].
    pub const fn is_plain(self) -> bool {
        matches!(self, Self::Plain)
    }
}

/// A race track known to the game
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Track {
    pub id: u32,
    pub name: &'static str,
    /// One lap, in miles
    pub length_miles: f64,
}

pub const TRACKS: &[Track] = &[
    Track { id: 6, name: "Uptown", length_miles: 2.25 },
    Track { id: 7, name: "Withdrawal", length_miles: 3.4 },
    Track { id: 8, name: "Underdog", length_miles: 1.73 },
    Track { id: 9, name: "Parkland", length_miles: 3.43 },
    Track { id: 10, name: "Docks", length_miles: 3.81 },
    Track { id: 11, name: "Commerce", length_miles: 1.09 },
    Track { id: 12, name: "Two Islands", length_miles: 2.71 },
    Track { id: 15, name: "Industrial", length_miles: 1.35 },
    Track { id: 16, name: "Vector", length_miles: 1.16 },
    Track { id: 17, name: "Mudpit", length_miles: 1.06 },
    Track { id: 18, name: "Hammerhead", length_miles: 1.16 },
    Track { id: 19, name: "Sewage", length_miles: 1.5 },
    Track { id: 20, name: "Meltdown", length_miles: 1.2 },
    Track { id: 21, name: "Speedway", length_miles: 0.9 },
    Track { id: 23, name: "Stone Park", length_miles: 2.08 },
    Track { id: 24, name: "Convict", length_miles: 1.64 },
];

pub fn track(id: u32) -> Option<&'static Track> {
    TRACKS.iter().find(|t| t.id == id)
}

pub fn track_by_name(name: &str) -> Option<&'static Track> {
    TRACKS.iter().find(|t| t.name.eq_ignore_ascii_case(name.trim()))
}

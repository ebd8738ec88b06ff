use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::num::TryFromIntError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const DEFAULT_ROOT_NAME: &str = "volley/player";
pub const DEFAULT_DIRECTORY_ADDR: &str = "127.0.0.1:23000";
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Horizontal position marking a ball that enters from the top centre of
/// the screen rather than through a side door.
pub const LAUNCH_X: f32 = -1.0;

pub type PeerId = u32;

/// Largest id a player can hold; the wire carries ids as `i32`.
pub const MAX_PEER_ID: PeerId = i32::MAX as PeerId;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl fmt::Display for Vec2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{:.2}, {:.2}}}", self.x, self.y)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Ball {
    pub owner: PeerId,
    pub position: Vec2,
    pub velocity: Vec2,
}

impl Ball {
    pub fn new(owner: PeerId, position: Vec2, velocity: Vec2) -> Self {
        Self {
            owner,
            position,
            velocity,
        }
    }
}

impl fmt::Display for Ball {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({} p{} v{})", self.owner, self.position, self.velocity)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Left,
    Right,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::Left => Direction::Right,
            Direction::Right => Direction::Left,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Left => write!(f, "left"),
            Direction::Right => write!(f, "right"),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DoorState {
    Open,
    Closed,
}

impl fmt::Display for DoorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DoorState::Open => write!(f, "open"),
            DoorState::Closed => write!(f, "closed"),
        }
    }
}

/// A change of door state on one side, as announced to the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DoorCommand {
    pub state: DoorState,
    pub direction: Direction,
}

impl DoorCommand {
    pub fn new(state: DoorState, direction: Direction) -> Self {
        Self { state, direction }
    }
}

impl fmt::Display for DoorCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self.state {
            DoorState::Open => "open",
            DoorState::Closed => "close",
        };
        write!(f, "{}-{}", verb, self.direction)
    }
}

/// A ball leaving the local screen through one of the side doors.
#[derive(Debug, Clone, PartialEq)]
pub struct BallCommand {
    pub ball: Ball,
    pub direction: Direction,
}

impl BallCommand {
    pub fn new(ball: Ball, direction: Direction) -> Self {
        Self { ball, direction }
    }
}

impl fmt::Display for BallCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "toss-{}-{}", self.ball, self.direction)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct WirePlayer {
    pub id: i32,
}

impl TryFrom<PeerId> for WirePlayer {
    type Error = TryFromIntError;

    /// Fails for ids above [`MAX_PEER_ID`] rather than sending someone else's id.
    fn try_from(id: PeerId) -> Result<Self, Self::Error> {
        Ok(Self {
            id: i32::try_from(id)?,
        })
    }
}

impl WirePlayer {
    /// Returns the peer id carried on the wire, or None if it is not positive.
    pub fn peer_id(&self) -> Option<PeerId> {
        if self.id > 0 {
            Some(self.id as PeerId)
        } else {
            None
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct WireBall {
    pub owner: WirePlayer,
    pub x: f32,
    pub y: f32,
    pub dx: f32,
    pub dy: f32,
}

impl TryFrom<&Ball> for WireBall {
    type Error = TryFromIntError;

    fn try_from(ball: &Ball) -> Result<Self, Self::Error> {
        Ok(Self {
            owner: WirePlayer::try_from(ball.owner)?,
            x: ball.position.x,
            y: ball.position.y,
            dx: ball.velocity.x,
            dy: ball.velocity.y,
        })
    }
}

impl WireBall {
    pub fn position(&self) -> Vec2 {
        Vec2::new(self.x, self.y)
    }

    pub fn velocity(&self) -> Vec2 {
        Vec2::new(self.dx, self.dy)
    }
}

/// Calls one peer makes on another.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Request {
    Recognize { player: WirePlayer },
    Forget { player: WirePlayer },
    Accept { ball: WireBall },
    Quit,
    Kick,
    SetPauseDuration { duration: f32 },
    SetGravity { gravity: f32 },
    DoMasterCommand { name: String },
}

impl Request {
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Recognize { .. } => "recognize",
            Request::Forget { .. } => "forget",
            Request::Accept { .. } => "accept",
            Request::Quit => "quit",
            Request::Kick => "kick",
            Request::SetPauseDuration { .. } => "set-pause-duration",
            Request::SetGravity { .. } => "set-gravity",
            Request::DoMasterCommand { .. } => "master-command",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Response {
    Ack,
    Rejected { reason: String },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum DirectoryRequest {
    Ping,
    Publish { name: String, addr: String },
    Unpublish { name: String },
    Lookup { prefix: String },
    Resolve { name: String },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum DirectoryResponse {
    Pong,
    Published,
    Unpublished,
    Names(Vec<String>),
    Address(Option<String>),
    Conflict { name: String, addr: String },
    Rejected { reason: String },
}

/// Name under which the peer with the given id publishes its endpoint.
pub fn server_name(root_name: &str, id: PeerId) -> String {
    format!("{}{:04}", root_name, id)
}

/// Recovers the peer id from a published name, e.g. `volley/player0007` -> 7.
///
/// Numbers above [`MAX_PEER_ID`] cannot be carried on the wire and are
/// treated like names with no number at all.
pub fn parse_peer_id(root_name: &str, name: &str) -> Option<PeerId> {
    let suffix = name.strip_prefix(root_name)?;
    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    suffix
        .parse::<PeerId>()
        .ok()
        .filter(|id| *id <= MAX_PEER_ID)
}

fn invalid_data<E>(error: E) -> io::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    io::Error::new(io::ErrorKind::InvalidData, error)
}

/// Writes one length-prefixed bincode frame.
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = bincode::serialize(message).map_err(invalid_data)?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(invalid_data(format!(
            "frame of {} bytes exceeds limit of {}",
            payload.len(),
            MAX_FRAME_LEN
        )));
    }
    writer.write_u32(payload.len() as u32).await?;
    writer.write_all(&payload).await?;
    writer.flush().await
}

/// Reads the raw payload of one frame. Returns None on a clean end of stream.
pub async fn read_frame_bytes<R>(reader: &mut R) -> io::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    };
    if len > MAX_FRAME_LEN {
        return Err(invalid_data(format!(
            "incoming frame of {} bytes exceeds limit of {}",
            len, MAX_FRAME_LEN
        )));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

pub async fn read_frame<R, T>(reader: &mut R) -> io::Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    match read_frame_bytes(reader).await? {
        Some(payload) => bincode::deserialize(&payload)
            .map(Some)
            .map_err(invalid_data),
        None => Ok(None),
    }
}

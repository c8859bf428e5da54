//! In-memory [`Gl`] implementation.
//!
//! `HeadlessGl` keeps just enough state to behave like a strict GLES 3.0
//! driver for the calls the pipeline makes: it validates GLSL structurally,
//! reflects `uniform`/`in`/`out` declarations to decide link success and
//! which uniforms are active, tracks every live object so leaks are visible,
//! and records clears, draws, and uploads for inspection.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use super::{Gl, GlError};

macro_rules! handles {
    ($($(#[$doc:meta])* $name:ident,)*) => {
        $(
            $(#[$doc])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(pub u32);
        )*
    };
}

handles! {
    ShaderId,
    ProgramId,
    TextureId,
    FramebufferId,
    BufferId,
    VertexArrayId,
}

/// Uniform location: the owning program plus the declared name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformSlot {
    pub program: ProgramId,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Vec2([f32; 2]),
    Int(i32),
}

impl UniformValue {
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            UniformValue::Float(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            UniformValue::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_vec2(&self) -> Option<[f32; 2]> {
        match self {
            UniformValue::Vec2(value) => Some(*value),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DrawCall {
    pub program: ProgramId,
    /// `None` is the default (visible) framebuffer.
    pub framebuffer: Option<FramebufferId>,
    pub viewport: [i32; 4],
    pub mode: u32,
    pub first: i32,
    pub count: i32,
    /// Every uniform value held by the program at draw time.
    pub uniforms: BTreeMap<String, UniformValue>,
    /// Texture bound on each `(unit index, target)`.
    pub textures: BTreeMap<(u32, u32), TextureId>,
}

impl DrawCall {
    pub fn uniform(&self, name: &str) -> Option<UniformValue> {
        self.uniforms.get(name).copied()
    }

    pub fn texture(&self, unit: u32, target: u32) -> Option<TextureId> {
        self.textures.get(&(unit, target)).copied()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextureUpload {
    pub texture: TextureId,
    pub target: u32,
    pub internal_format: i32,
    pub width: i32,
    pub height: i32,
    pub format: u32,
    pub ty: u32,
    pub has_pixels: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GlEvent {
    Clear {
        framebuffer: Option<FramebufferId>,
        color: [f32; 4],
        mask: u32,
    },
    Draw(DrawCall),
    Upload(TextureUpload),
}

#[derive(Debug, Default)]
struct Declarations {
    uniforms: Vec<String>,
    inputs: Vec<String>,
    outputs: Vec<String>,
}

#[derive(Debug)]
struct ShaderObject {
    kind: u32,
    source: String,
    compiled: bool,
    log: String,
    declarations: Declarations,
    active_uniforms: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct ProgramObject {
    attached: Vec<ShaderId>,
    linked: bool,
    log: String,
    active_uniforms: BTreeSet<String>,
    values: BTreeMap<String, UniformValue>,
    attributes: BTreeMap<String, u32>,
}

#[derive(Debug, Default)]
struct TextureObject {
    images: BTreeMap<u32, (i32, i32)>,
    parameters: BTreeMap<u32, i32>,
    mipmapped: bool,
}

#[derive(Debug, Default)]
struct FramebufferObject {
    color: Option<TextureId>,
}

#[derive(Debug)]
struct State {
    next_id: u32,
    shaders: HashMap<ShaderId, ShaderObject>,
    programs: HashMap<ProgramId, ProgramObject>,
    textures: HashMap<TextureId, TextureObject>,
    framebuffers: HashMap<FramebufferId, FramebufferObject>,
    buffers: HashSet<BufferId>,
    vertex_arrays: HashSet<VertexArrayId>,
    current_program: Option<ProgramId>,
    active_unit: u32,
    texture_bindings: HashMap<(u32, u32), TextureId>,
    framebuffer: Option<FramebufferId>,
    viewport: [i32; 4],
    clear_color: [f32; 4],
    errors: VecDeque<u32>,
    extensions: BTreeSet<String>,
    rejected_formats: HashSet<i32>,
    poisoned_tokens: Vec<String>,
    incomplete_framebuffers: bool,
    events: Vec<GlEvent>,
}

impl State {
    fn allocate(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn raise(&mut self, code: u32) {
        self.errors.push_back(code);
    }

    fn bound_texture(&self, target: u32) -> Option<TextureId> {
        self.texture_bindings
            .get(&(self.active_unit, binding_target(target)))
            .copied()
    }
}

/// Extensions a typical WebGL2 implementation reports.
const DEFAULT_EXTENSIONS: [&str; 5] = [
    "EXT_color_buffer_float",
    "OES_texture_float",
    "OES_texture_float_linear",
    "OES_texture_half_float",
    "WEBGL_depth_texture",
];

#[derive(Debug)]
pub struct HeadlessGl {
    state: RefCell<State>,
}

impl Default for HeadlessGl {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessGl {
    pub fn new() -> Self {
        Self {
            state: RefCell::new(State {
                next_id: 0,
                shaders: HashMap::new(),
                programs: HashMap::new(),
                textures: HashMap::new(),
                framebuffers: HashMap::new(),
                buffers: HashSet::new(),
                vertex_arrays: HashSet::new(),
                current_program: None,
                active_unit: 0,
                texture_bindings: HashMap::new(),
                framebuffer: None,
                viewport: [0; 4],
                clear_color: [0.0; 4],
                errors: VecDeque::new(),
                extensions: DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
                rejected_formats: HashSet::new(),
                poisoned_tokens: Vec::new(),
                incomplete_framebuffers: false,
                events: Vec::new(),
            }),
        }
    }

    /// Makes `texImage2D` fail for this internal format.
    pub fn reject_internal_format(&self, format: i32) {
        self.state.borrow_mut().rejected_formats.insert(format);
    }

    pub fn hide_extension(&self, name: &str) {
        self.state.borrow_mut().extensions.remove(name);
    }

    /// Any shader whose source contains `token` fails to compile.
    pub fn fail_compiles_containing(&self, token: &str) {
        self.state
            .borrow_mut()
            .poisoned_tokens
            .push(token.to_string());
    }

    /// Reports every framebuffer as incomplete from now on.
    pub fn break_framebuffers(&self) {
        self.state.borrow_mut().incomplete_framebuffers = true;
    }

    /// Queues an error flag as if a previous call had raised it.
    pub fn push_error(&self, code: u32) {
        self.state.borrow_mut().raise(code);
    }

    pub fn pending_errors(&self) -> usize {
        self.state.borrow().errors.len()
    }

    pub fn live_shaders(&self) -> usize {
        self.state.borrow().shaders.len()
    }

    pub fn live_programs(&self) -> usize {
        self.state.borrow().programs.len()
    }

    pub fn live_textures(&self) -> usize {
        self.state.borrow().textures.len()
    }

    pub fn live_framebuffers(&self) -> usize {
        self.state.borrow().framebuffers.len()
    }

    pub fn live_buffers(&self) -> usize {
        let state = self.state.borrow();
        state.buffers.len() + state.vertex_arrays.len()
    }

    /// Total of every live object of every kind.
    pub fn live_objects(&self) -> usize {
        self.live_shaders()
            + self.live_programs()
            + self.live_textures()
            + self.live_framebuffers()
            + self.live_buffers()
    }

    pub fn events(&self) -> Vec<GlEvent> {
        self.state.borrow().events.clone()
    }

    pub fn clear_events(&self) {
        self.state.borrow_mut().events.clear();
    }

    pub fn draws(&self) -> Vec<DrawCall> {
        self.state
            .borrow()
            .events
            .iter()
            .filter_map(|event| match event {
                GlEvent::Draw(draw) => Some(draw.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn uploads(&self) -> Vec<TextureUpload> {
        self.state
            .borrow()
            .events
            .iter()
            .filter_map(|event| match event {
                GlEvent::Upload(upload) => Some(upload.clone()),
                _ => None,
            })
            .collect()
    }

    /// Colour texture attached to `framebuffer`.
    pub fn framebuffer_texture(&self, framebuffer: FramebufferId) -> Option<TextureId> {
        self.state
            .borrow()
            .framebuffers
            .get(&framebuffer)
            .and_then(|fb| fb.color)
    }

    pub fn texture_parameter(&self, texture: TextureId, parameter: u32) -> Option<i32> {
        self.state
            .borrow()
            .textures
            .get(&texture)
            .and_then(|tex| tex.parameters.get(&parameter).copied())
    }

    pub fn texture_size(&self, texture: TextureId, target: u32) -> Option<(i32, i32)> {
        self.state
            .borrow()
            .textures
            .get(&texture)
            .and_then(|tex| tex.images.get(&target).copied())
    }

    pub fn is_mipmapped(&self, texture: TextureId) -> bool {
        self.state
            .borrow()
            .textures
            .get(&texture)
            .is_some_and(|tex| tex.mipmapped)
    }

    /// Names of the uniforms that survived linking.
    pub fn active_uniforms(&self, program: ProgramId) -> Vec<String> {
        self.state
            .borrow()
            .programs
            .get(&program)
            .map(|p| p.active_uniforms.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn attribute_location(&self, program: ProgramId, name: &str) -> Option<u32> {
        self.state
            .borrow()
            .programs
            .get(&program)
            .and_then(|p| p.attributes.get(name).copied())
    }
}

fn binding_target(target: u32) -> u32 {
    if (glow::TEXTURE_CUBE_MAP_POSITIVE_X..=glow::TEXTURE_CUBE_MAP_NEGATIVE_Z).contains(&target) {
        glow::TEXTURE_CUBE_MAP
    } else {
        target
    }
}

fn components(format: u32) -> Option<usize> {
    match format {
        glow::RGBA => Some(4),
        glow::RGB => Some(3),
        glow::LUMINANCE_ALPHA | glow::RG => Some(2),
        glow::LUMINANCE | glow::ALPHA | glow::RED => Some(1),
        _ => None,
    }
}

fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn word_occurrences(source: &str, word: &str) -> usize {
    source
        .match_indices(word)
        .filter(|(index, _)| {
            let before = source[..*index].chars().next_back();
            let after = source[index + word.len()..].chars().next();
            !before.is_some_and(is_identifier_char) && !after.is_some_and(is_identifier_char)
        })
        .count()
}

fn strip_comment(line: &str) -> &str {
    match line.find("//") {
        Some(index) => &line[..index],
        None => line,
    }
}

/// Collects global `uniform`, `in`, and `out` declarations.
fn reflect(source: &str) -> Declarations {
    let mut declarations = Declarations::default();
    let mut depth = 0i32;
    for raw in source.lines() {
        let line = strip_comment(raw).trim();
        if depth == 0 && line.ends_with(';') {
            let mut rest = line.trim_end_matches(';');
            if rest.starts_with("layout") {
                if let Some(close) = rest.find(')') {
                    rest = &rest[close + 1..];
                }
            }
            let tokens: Vec<&str> = rest
                .split_whitespace()
                .filter(|token| !matches!(*token, "flat" | "smooth" | "centroid" | "noperspective"))
                .collect();
            if let (Some(first), Some(last)) = (tokens.first(), tokens.last()) {
                let name = last.split('[').next().unwrap_or(last).to_string();
                if tokens.len() >= 3 {
                    match *first {
                        "uniform" => declarations.uniforms.push(name),
                        "in" => declarations.inputs.push(name),
                        "out" => declarations.outputs.push(name),
                        _ => {}
                    }
                }
            }
        }
        depth += line.matches('{').count() as i32;
        depth -= line.matches('}').count() as i32;
    }
    declarations
}

fn validate(source: &str, poisoned: &[String]) -> Result<(), String> {
    if source.trim().is_empty() {
        return Err("ERROR: 0:0: empty shader source".to_string());
    }
    if let Some(token) = poisoned.iter().find(|token| source.contains(token.as_str())) {
        return Err(format!("ERROR: 0:0: '{token}' : syntax error"));
    }
    let first_directive = source
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with("//"));
    if source.contains("#version") && !first_directive.is_some_and(|line| line.starts_with("#version")) {
        return Err("ERROR: 0:1: '#version' : must occur first in shader".to_string());
    }
    let mut braces = 0i32;
    let mut parens = 0i32;
    for (number, raw) in source.lines().enumerate() {
        for c in strip_comment(raw).chars() {
            match c {
                '{' => braces += 1,
                '}' => braces -= 1,
                '(' => parens += 1,
                ')' => parens -= 1,
                _ => {}
            }
            if braces < 0 || parens < 0 {
                return Err(format!("ERROR: 0:{}: unexpected closing delimiter", number + 1));
            }
        }
    }
    if braces != 0 || parens != 0 {
        return Err("ERROR: 0:0: unexpected end of file".to_string());
    }
    if word_occurrences(source, "main") == 0 || !source.contains("void main") {
        return Err("ERROR: 0:0: missing main()".to_string());
    }
    Ok(())
}

impl Gl for HeadlessGl {
    type Shader = ShaderId;
    type Program = ProgramId;
    type Texture = TextureId;
    type Framebuffer = FramebufferId;
    type Buffer = BufferId;
    type VertexArray = VertexArrayId;
    type UniformLocation = UniformSlot;

    fn create_shader(&self, kind: u32) -> Result<Self::Shader, GlError> {
        if kind != glow::VERTEX_SHADER && kind != glow::FRAGMENT_SHADER {
            return Err(GlError::Create {
                object: "shader",
                message: format!("unsupported shader type {kind:#06x}"),
            });
        }
        let mut state = self.state.borrow_mut();
        let id = ShaderId(state.allocate());
        state.shaders.insert(
            id,
            ShaderObject {
                kind,
                source: String::new(),
                compiled: false,
                log: String::new(),
                declarations: Declarations::default(),
                active_uniforms: BTreeSet::new(),
            },
        );
        Ok(id)
    }

    fn shader_source(&self, shader: Self::Shader, source: &str) {
        let mut state = self.state.borrow_mut();
        match state.shaders.get_mut(&shader) {
            Some(object) => object.source = source.to_string(),
            None => state.raise(glow::INVALID_VALUE),
        }
    }

    fn compile_shader(&self, shader: Self::Shader) {
        let mut state = self.state.borrow_mut();
        let poisoned = state.poisoned_tokens.clone();
        let Some(object) = state.shaders.get_mut(&shader) else {
            state.raise(glow::INVALID_VALUE);
            return;
        };
        match validate(&object.source, &poisoned) {
            Ok(()) => {
                object.compiled = true;
                object.log.clear();
                object.declarations = reflect(&object.source);
                object.active_uniforms = object
                    .declarations
                    .uniforms
                    .iter()
                    .filter(|name| word_occurrences(&object.source, name) >= 2)
                    .cloned()
                    .collect();
            }
            Err(log) => {
                object.compiled = false;
                object.log = log;
            }
        }
    }

    fn shader_compile_status(&self, shader: Self::Shader) -> bool {
        self.state
            .borrow()
            .shaders
            .get(&shader)
            .is_some_and(|object| object.compiled)
    }

    fn shader_info_log(&self, shader: Self::Shader) -> String {
        self.state
            .borrow()
            .shaders
            .get(&shader)
            .map(|object| object.log.clone())
            .unwrap_or_default()
    }

    fn delete_shader(&self, shader: Self::Shader) {
        let mut state = self.state.borrow_mut();
        if state.shaders.remove(&shader).is_none() {
            state.raise(glow::INVALID_VALUE);
        }
    }

    fn create_program(&self) -> Result<Self::Program, GlError> {
        let mut state = self.state.borrow_mut();
        let id = ProgramId(state.allocate());
        state.programs.insert(id, ProgramObject::default());
        Ok(id)
    }

    fn attach_shader(&self, program: Self::Program, shader: Self::Shader) {
        let mut state = self.state.borrow_mut();
        if !state.shaders.contains_key(&shader) {
            state.raise(glow::INVALID_VALUE);
            return;
        }
        match state.programs.get_mut(&program) {
            Some(object) => object.attached.push(shader),
            None => state.raise(glow::INVALID_VALUE),
        }
    }

    fn detach_shader(&self, program: Self::Program, shader: Self::Shader) {
        let mut state = self.state.borrow_mut();
        match state.programs.get_mut(&program) {
            Some(object) => object.attached.retain(|attached| *attached != shader),
            None => state.raise(glow::INVALID_VALUE),
        }
    }

    fn bind_attrib_location(&self, program: Self::Program, index: u32, name: &str) {
        let mut state = self.state.borrow_mut();
        match state.programs.get_mut(&program) {
            Some(object) => {
                object.attributes.insert(name.to_string(), index);
            }
            None => state.raise(glow::INVALID_VALUE),
        }
    }

    fn link_program(&self, program: Self::Program) {
        let mut state = self.state.borrow_mut();
        let Some(attached) = state.programs.get(&program).map(|p| p.attached.clone()) else {
            state.raise(glow::INVALID_VALUE);
            return;
        };

        let stage = |kind: u32| {
            attached
                .iter()
                .filter_map(|id| state.shaders.get(id))
                .find(|shader| shader.kind == kind)
        };
        let result = match (stage(glow::VERTEX_SHADER), stage(glow::FRAGMENT_SHADER)) {
            (Some(vertex), Some(fragment)) if vertex.compiled && fragment.compiled => {
                let unmatched: Vec<&String> = fragment
                    .declarations
                    .inputs
                    .iter()
                    .filter(|input| !vertex.declarations.outputs.contains(input))
                    .collect();
                if unmatched.is_empty() {
                    Ok(vertex
                        .active_uniforms
                        .union(&fragment.active_uniforms)
                        .cloned()
                        .collect::<BTreeSet<_>>())
                } else {
                    Err(format!(
                        "error: fragment input(s) {unmatched:?} not written by vertex shader"
                    ))
                }
            }
            (Some(_), Some(_)) => Err("error: attached shaders are not compiled".to_string()),
            _ => Err("error: program needs one vertex and one fragment shader".to_string()),
        };

        if let Some(object) = state.programs.get_mut(&program) {
            object.values.clear();
            match result {
                Ok(uniforms) => {
                    object.linked = true;
                    object.log.clear();
                    object.active_uniforms = uniforms;
                }
                Err(log) => {
                    object.linked = false;
                    object.log = log;
                    object.active_uniforms.clear();
                }
            }
        }
    }

    fn program_link_status(&self, program: Self::Program) -> bool {
        self.state
            .borrow()
            .programs
            .get(&program)
            .is_some_and(|object| object.linked)
    }

    fn program_info_log(&self, program: Self::Program) -> String {
        self.state
            .borrow()
            .programs
            .get(&program)
            .map(|object| object.log.clone())
            .unwrap_or_default()
    }

    fn use_program(&self, program: Option<Self::Program>) {
        let mut state = self.state.borrow_mut();
        match program {
            Some(id) if !state.programs.get(&id).is_some_and(|p| p.linked) => {
                state.raise(glow::INVALID_OPERATION);
            }
            _ => state.current_program = program,
        }
    }

    fn delete_program(&self, program: Self::Program) {
        let mut state = self.state.borrow_mut();
        if state.programs.remove(&program).is_none() {
            state.raise(glow::INVALID_VALUE);
            return;
        }
        if state.current_program == Some(program) {
            state.current_program = None;
        }
    }

    fn uniform_location(
        &self,
        program: Self::Program,
        name: &str,
    ) -> Option<Self::UniformLocation> {
        let state = self.state.borrow();
        let object = state.programs.get(&program)?;
        (object.linked && object.active_uniforms.contains(name)).then(|| UniformSlot {
            program,
            name: name.to_string(),
        })
    }

    fn uniform_1_f32(&self, location: &Self::UniformLocation, x: f32) {
        set_uniform(&self.state, location, UniformValue::Float(x));
    }

    fn uniform_2_f32(&self, location: &Self::UniformLocation, x: f32, y: f32) {
        set_uniform(&self.state, location, UniformValue::Vec2([x, y]));
    }

    fn uniform_1_i32(&self, location: &Self::UniformLocation, x: i32) {
        set_uniform(&self.state, location, UniformValue::Int(x));
    }

    fn create_texture(&self) -> Result<Self::Texture, GlError> {
        let mut state = self.state.borrow_mut();
        let id = TextureId(state.allocate());
        state.textures.insert(id, TextureObject::default());
        Ok(id)
    }

    fn active_texture(&self, unit: u32) {
        let mut state = self.state.borrow_mut();
        match unit.checked_sub(glow::TEXTURE0) {
            Some(index) if index < 32 => state.active_unit = index,
            _ => state.raise(glow::INVALID_ENUM),
        }
    }

    fn bind_texture(&self, target: u32, texture: Option<Self::Texture>) {
        let mut state = self.state.borrow_mut();
        let key = (state.active_unit, target);
        match texture {
            Some(id) if !state.textures.contains_key(&id) => state.raise(glow::INVALID_OPERATION),
            Some(id) => {
                state.texture_bindings.insert(key, id);
            }
            None => {
                state.texture_bindings.remove(&key);
            }
        }
    }

    fn tex_image_2d(
        &self,
        target: u32,
        _level: i32,
        internal_format: i32,
        width: i32,
        height: i32,
        format: u32,
        ty: u32,
        pixels: Option<&[u8]>,
    ) -> Result<(), GlError> {
        let mut state = self.state.borrow_mut();
        let call = "texImage2D";
        let Some(texture) = state.bound_texture(target) else {
            return Err(GlError::Call {
                call,
                code: glow::INVALID_OPERATION,
            });
        };
        if state.rejected_formats.contains(&internal_format) {
            return Err(GlError::Call {
                call,
                code: glow::INVALID_ENUM,
            });
        }
        if width < 0 || height < 0 {
            return Err(GlError::Call {
                call,
                code: glow::INVALID_VALUE,
            });
        }
        if let (Some(data), Some(channels), glow::UNSIGNED_BYTE) = (pixels, components(format), ty)
        {
            let expected = width as usize * height as usize * channels;
            if data.len() < expected {
                return Err(GlError::Call {
                    call,
                    code: glow::INVALID_OPERATION,
                });
            }
        }
        if let Some(object) = state.textures.get_mut(&texture) {
            object.images.insert(target, (width, height));
        }
        state.events.push(GlEvent::Upload(TextureUpload {
            texture,
            target,
            internal_format,
            width,
            height,
            format,
            ty,
            has_pixels: pixels.is_some(),
        }));
        Ok(())
    }

    fn tex_parameter_i32(&self, target: u32, parameter: u32, value: i32) {
        let mut state = self.state.borrow_mut();
        let Some(texture) = state.bound_texture(target) else {
            state.raise(glow::INVALID_OPERATION);
            return;
        };
        if let Some(object) = state.textures.get_mut(&texture) {
            object.parameters.insert(parameter, value);
        }
    }

    fn generate_mipmap(&self, target: u32) -> Result<(), GlError> {
        let mut state = self.state.borrow_mut();
        let texture = state.bound_texture(target).ok_or(GlError::Call {
            call: "generateMipmap",
            code: glow::INVALID_OPERATION,
        })?;
        if let Some(object) = state.textures.get_mut(&texture) {
            object.mipmapped = true;
        }
        Ok(())
    }

    fn delete_texture(&self, texture: Self::Texture) {
        let mut state = self.state.borrow_mut();
        if state.textures.remove(&texture).is_none() {
            state.raise(glow::INVALID_VALUE);
            return;
        }
        state.texture_bindings.retain(|_, bound| *bound != texture);
    }

    fn create_framebuffer(&self) -> Result<Self::Framebuffer, GlError> {
        let mut state = self.state.borrow_mut();
        let id = FramebufferId(state.allocate());
        state.framebuffers.insert(id, FramebufferObject::default());
        Ok(id)
    }

    fn bind_framebuffer(&self, _target: u32, framebuffer: Option<Self::Framebuffer>) {
        let mut state = self.state.borrow_mut();
        match framebuffer {
            Some(id) if !state.framebuffers.contains_key(&id) => {
                state.raise(glow::INVALID_OPERATION)
            }
            _ => state.framebuffer = framebuffer,
        }
    }

    fn framebuffer_texture_2d(
        &self,
        _target: u32,
        attachment: u32,
        _texture_target: u32,
        texture: Option<Self::Texture>,
        _level: i32,
    ) {
        let mut state = self.state.borrow_mut();
        let Some(bound) = state.framebuffer else {
            state.raise(glow::INVALID_OPERATION);
            return;
        };
        if attachment != glow::COLOR_ATTACHMENT0 {
            state.raise(glow::INVALID_ENUM);
            return;
        }
        if let Some(object) = state.framebuffers.get_mut(&bound) {
            object.color = texture;
        }
    }

    fn check_framebuffer_status(&self, _target: u32) -> u32 {
        let state = self.state.borrow();
        let Some(bound) = state.framebuffer else {
            return glow::FRAMEBUFFER_COMPLETE;
        };
        if state.incomplete_framebuffers {
            return glow::FRAMEBUFFER_INCOMPLETE_ATTACHMENT;
        }
        let color = state.framebuffers.get(&bound).and_then(|fb| fb.color);
        match color.and_then(|id| state.textures.get(&id)) {
            None => glow::FRAMEBUFFER_INCOMPLETE_MISSING_ATTACHMENT,
            Some(texture) => match texture.images.get(&glow::TEXTURE_2D) {
                Some((width, height)) if *width > 0 && *height > 0 => glow::FRAMEBUFFER_COMPLETE,
                _ => glow::FRAMEBUFFER_INCOMPLETE_ATTACHMENT,
            },
        }
    }

    fn delete_framebuffer(&self, framebuffer: Self::Framebuffer) {
        let mut state = self.state.borrow_mut();
        if state.framebuffers.remove(&framebuffer).is_none() {
            state.raise(glow::INVALID_VALUE);
            return;
        }
        if state.framebuffer == Some(framebuffer) {
            state.framebuffer = None;
        }
    }

    fn create_buffer(&self) -> Result<Self::Buffer, GlError> {
        let mut state = self.state.borrow_mut();
        let id = BufferId(state.allocate());
        state.buffers.insert(id);
        Ok(id)
    }

    fn bind_buffer(&self, _target: u32, buffer: Option<Self::Buffer>) {
        let mut state = self.state.borrow_mut();
        if buffer.is_some_and(|id| !state.buffers.contains(&id)) {
            state.raise(glow::INVALID_OPERATION);
        }
    }

    fn buffer_data_u8_slice(&self, _target: u32, _data: &[u8], _usage: u32) {}

    fn delete_buffer(&self, buffer: Self::Buffer) {
        let mut state = self.state.borrow_mut();
        if !state.buffers.remove(&buffer) {
            state.raise(glow::INVALID_VALUE);
        }
    }

    fn create_vertex_array(&self) -> Result<Self::VertexArray, GlError> {
        let mut state = self.state.borrow_mut();
        let id = VertexArrayId(state.allocate());
        state.vertex_arrays.insert(id);
        Ok(id)
    }

    fn bind_vertex_array(&self, vertex_array: Option<Self::VertexArray>) {
        let mut state = self.state.borrow_mut();
        if vertex_array.is_some_and(|id| !state.vertex_arrays.contains(&id)) {
            state.raise(glow::INVALID_OPERATION);
        }
    }

    fn enable_vertex_attrib_array(&self, _index: u32) {}

    fn vertex_attrib_pointer_f32(&self, _index: u32, _size: i32, _stride: i32, _offset: i32) {}

    fn delete_vertex_array(&self, vertex_array: Self::VertexArray) {
        let mut state = self.state.borrow_mut();
        if !state.vertex_arrays.remove(&vertex_array) {
            state.raise(glow::INVALID_VALUE);
        }
    }

    fn viewport(&self, x: i32, y: i32, width: i32, height: i32) {
        self.state.borrow_mut().viewport = [x, y, width, height];
    }

    fn clear_color(&self, r: f32, g: f32, b: f32, a: f32) {
        self.state.borrow_mut().clear_color = [r, g, b, a];
    }

    fn clear(&self, mask: u32) {
        let mut state = self.state.borrow_mut();
        let event = GlEvent::Clear {
            framebuffer: state.framebuffer,
            color: state.clear_color,
            mask,
        };
        state.events.push(event);
    }

    fn draw_arrays(&self, mode: u32, first: i32, count: i32) {
        let mut state = self.state.borrow_mut();
        let Some(program) = state.current_program else {
            state.raise(glow::INVALID_OPERATION);
            return;
        };
        let uniforms = state
            .programs
            .get(&program)
            .map(|p| p.values.clone())
            .unwrap_or_default();
        let textures = state
            .texture_bindings
            .iter()
            .map(|(key, texture)| (*key, *texture))
            .collect();
        let draw = DrawCall {
            program,
            framebuffer: state.framebuffer,
            viewport: state.viewport,
            mode,
            first,
            count,
            uniforms,
            textures,
        };
        state.events.push(GlEvent::Draw(draw));
    }

    fn get_error(&self) -> u32 {
        self.state
            .borrow_mut()
            .errors
            .pop_front()
            .unwrap_or(glow::NO_ERROR)
    }

    fn has_extension(&self, name: &str) -> bool {
        self.state.borrow().extensions.contains(name)
    }
}

fn set_uniform(state: &RefCell<State>, location: &UniformSlot, value: UniformValue) {
    let mut state = state.borrow_mut();
    if state.current_program != Some(location.program) {
        state.raise(glow::INVALID_OPERATION);
        return;
    }
    match state.programs.get_mut(&location.program) {
        Some(program) => {
            program.values.insert(location.name.clone(), value);
        }
        None => state.raise(glow::INVALID_OPERATION),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VERT: &str = "#version 300 es\nin vec3 position;\nout vec2 uv;\nvoid main() {\n    uv = position.xy;\n    gl_Position = vec4(position, 1.0);\n}\n";
    const FRAG: &str = "#version 300 es\nprecision highp float;\nin vec2 uv;\nout vec4 fragColor;\nuniform float time;\nuniform float unused;\nvoid main() {\n    fragColor = vec4(uv, time, 1.0);\n}\n";

    fn compile(gl: &HeadlessGl, kind: u32, source: &str) -> ShaderId {
        let shader = gl.create_shader(kind).unwrap();
        gl.shader_source(shader, source);
        gl.compile_shader(shader);
        shader
    }

    #[test]
    fn reflects_global_declarations_only() {
        let decl = reflect(
            "layout(location = 0) out vec4 color;\nuniform highp float values[4];\nflat in int id;\nvoid main() {\n    float local;\n}\n",
        );
        assert_eq!(decl.outputs, vec!["color".to_string()]);
        assert_eq!(decl.uniforms, vec!["values".to_string()]);
        assert_eq!(decl.inputs, vec!["id".to_string()]);
    }

    #[test]
    fn rejects_unbalanced_sources() {
        let gl = HeadlessGl::new();
        let shader = compile(&gl, glow::FRAGMENT_SHADER, "void main() {\n");
        assert!(!gl.shader_compile_status(shader));
        assert!(gl.shader_info_log(shader).contains("end of file"));
    }

    #[test]
    fn version_must_come_first() {
        let gl = HeadlessGl::new();
        let shader = compile(
            &gl,
            glow::VERTEX_SHADER,
            "precision highp float;\n#version 300 es\nvoid main() {}\n",
        );
        assert!(!gl.shader_compile_status(shader));
    }

    #[test]
    fn links_and_prunes_unused_uniforms() {
        let gl = HeadlessGl::new();
        let vs = compile(&gl, glow::VERTEX_SHADER, VERT);
        let fs = compile(&gl, glow::FRAGMENT_SHADER, FRAG);
        let program = gl.create_program().unwrap();
        gl.attach_shader(program, vs);
        gl.attach_shader(program, fs);
        gl.link_program(program);
        assert!(gl.program_link_status(program));
        assert!(gl.uniform_location(program, "time").is_some());
        assert!(gl.uniform_location(program, "unused").is_none());
    }

    #[test]
    fn link_fails_on_unmatched_varying() {
        let gl = HeadlessGl::new();
        let vs = compile(
            &gl,
            glow::VERTEX_SHADER,
            "in vec3 position;\nvoid main() {\n    gl_Position = vec4(position, 1.0);\n}\n",
        );
        let fs = compile(&gl, glow::FRAGMENT_SHADER, FRAG);
        let program = gl.create_program().unwrap();
        gl.attach_shader(program, vs);
        gl.attach_shader(program, fs);
        gl.link_program(program);
        assert!(!gl.program_link_status(program));
        assert!(gl.program_info_log(program).contains("uv"));
    }

    #[test]
    fn uniform_writes_require_current_program() {
        let gl = HeadlessGl::new();
        let vs = compile(&gl, glow::VERTEX_SHADER, VERT);
        let fs = compile(&gl, glow::FRAGMENT_SHADER, FRAG);
        let program = gl.create_program().unwrap();
        gl.attach_shader(program, vs);
        gl.attach_shader(program, fs);
        gl.link_program(program);
        let time = gl.uniform_location(program, "time").unwrap();

        gl.uniform_1_f32(&time, 1.0);
        assert_eq!(gl.get_error(), glow::INVALID_OPERATION);

        gl.use_program(Some(program));
        gl.uniform_1_f32(&time, 2.0);
        gl.draw_arrays(glow::TRIANGLES, 0, 6);
        let draws = gl.draws();
        assert_eq!(draws[0].uniform("time"), Some(UniformValue::Float(2.0)));
        assert_eq!(gl.get_error(), glow::NO_ERROR);
    }

    #[test]
    fn framebuffer_completeness_tracks_attachment() {
        let gl = HeadlessGl::new();
        let fb = gl.create_framebuffer().unwrap();
        gl.bind_framebuffer(glow::FRAMEBUFFER, Some(fb));
        assert_eq!(
            gl.check_framebuffer_status(glow::FRAMEBUFFER),
            glow::FRAMEBUFFER_INCOMPLETE_MISSING_ATTACHMENT
        );

        let tex = gl.create_texture().unwrap();
        gl.bind_texture(glow::TEXTURE_2D, Some(tex));
        gl.tex_image_2d(
            glow::TEXTURE_2D,
            0,
            glow::RGBA8 as i32,
            4,
            4,
            glow::RGBA,
            glow::UNSIGNED_BYTE,
            None,
        )
        .unwrap();
        gl.framebuffer_texture_2d(
            glow::FRAMEBUFFER,
            glow::COLOR_ATTACHMENT0,
            glow::TEXTURE_2D,
            Some(tex),
            0,
        );
        assert_eq!(
            gl.check_framebuffer_status(glow::FRAMEBUFFER),
            glow::FRAMEBUFFER_COMPLETE
        );
    }

    #[test]
    fn upload_validates_binding_and_size() {
        let gl = HeadlessGl::new();
        let err = gl
            .tex_image_2d(glow::TEXTURE_2D, 0, glow::RGBA as i32, 1, 1, glow::RGBA, glow::UNSIGNED_BYTE, None)
            .unwrap_err();
        assert_eq!(
            err,
            GlError::Call {
                call: "texImage2D",
                code: glow::INVALID_OPERATION
            }
        );

        let tex = gl.create_texture().unwrap();
        gl.bind_texture(glow::TEXTURE_2D, Some(tex));
        assert!(gl
            .tex_image_2d(glow::TEXTURE_2D, 0, glow::RGBA as i32, 2, 2, glow::RGBA, glow::UNSIGNED_BYTE, Some(&[0; 8]))
            .is_err());
        assert!(gl
            .tex_image_2d(glow::TEXTURE_2D, 0, glow::RGBA as i32, 2, 2, glow::RGBA, glow::UNSIGNED_BYTE, Some(&[0; 16]))
            .is_ok());
    }

    #[test]
    fn tracks_live_objects() {
        let gl = HeadlessGl::new();
        let tex = gl.create_texture().unwrap();
        let shader = gl.create_shader(glow::VERTEX_SHADER).unwrap();
        assert_eq!(gl.live_objects(), 2);
        gl.delete_texture(tex);
        gl.delete_shader(shader);
        assert_eq!(gl.live_objects(), 0);
        gl.delete_shader(shader);
        assert_eq!(gl.get_error(), glow::INVALID_VALUE);
    }
}

use crate::expr::CompileError;

pub const ITERATE_MARKER: &str = "@ITERATE@";
pub const BAILOUT_MARKER: &str = "@BAILOUT@";
pub const INITIAL_MARKER: &str = "@INITIAL@";

/// Uniform slot array length in the template's `Uniforms` struct.
pub const MAX_SLOTS: usize = 16;

/// Every marker appears once in the orbit kernel and once in the surface kernel.
pub const MARKER_USES: usize = 2;

pub const STAGE_RENDER: u32 = 0;
pub const STAGE_POSTPROCESS: u32 = 1;
pub const STAGE_COMPUTE: u32 = 2;

pub const KERNEL_TEMPLATE: &str = r#"
#include <metal_stdlib>
using namespace metal;

#define STAGE_RENDER 0u
#define STAGE_POSTPROCESS 1u
#define STAGE_COMPUTE 2u

struct Uniforms {
    uint width;
    uint height;
    uint iterations;
    uint stage;

    float2 center_hi;
    float2 center_lo;

    float pixel_size;
    float rotation;
    uint flip_x;
    uint flip_y;

    float power;
    float bailout;
    float2 mouse;

    float2 jitter;
    float2 seed;

    uint julia;
    uint slot_count;
    uint _pad0;
    uint _pad1;

    float slots[16];
};

struct Sample {
    uint iterations;
    uint escaped;
    float norm;
    uint _pad;
};

inline float2 c_add(float2 a, float2 b) { return a + b; }
inline float2 c_sub(float2 a, float2 b) { return a - b; }
inline float2 c_mul(float2 a, float2 b) { return float2(a.x * b.x - a.y * b.y, a.x * b.y + a.y * b.x); }
inline float2 c_div(float2 a, float2 b) {
    float d = dot(b, b);
    return float2(a.x * b.x + a.y * b.y, a.y * b.x - a.x * b.y) / d;
}
inline float2 c_sqr(float2 a) { return float2(a.x * a.x - a.y * a.y, 2.0f * a.x * a.y); }
inline float2 c_conj(float2 a) { return float2(a.x, -a.y); }
inline float2 c_abs(float2 a) { return abs(a); }
inline float2 c_re(float2 a) { return float2(a.x, 0.0f); }
inline float2 c_im(float2 a) { return float2(a.y, 0.0f); }
inline float2 c_length(float2 a) { return float2(length(a), 0.0f); }
inline float2 c_norm(float2 a) { return float2(dot(a, a), 0.0f); }
inline float2 c_arg(float2 a) { return float2(atan2(a.y, a.x), 0.0f); }
inline float2 c_exp(float2 a) { float m = exp(a.x); return float2(m * cos(a.y), m * sin(a.y)); }
inline float2 c_log(float2 a) { return float2(log(length(a)), atan2(a.y, a.x)); }
inline float2 c_sqrt(float2 a) {
    float r = sqrt(length(a));
    float t = 0.5f * atan2(a.y, a.x);
    return float2(r * cos(t), r * sin(t));
}
inline float2 c_sin(float2 a) { return float2(sin(a.x) * cosh(a.y), cos(a.x) * sinh(a.y)); }
inline float2 c_cos(float2 a) { return float2(cos(a.x) * cosh(a.y), -sin(a.x) * sinh(a.y)); }
inline float2 c_tan(float2 a) { return c_div(c_sin(a), c_cos(a)); }
inline float2 c_sinh(float2 a) { return float2(sinh(a.x) * cos(a.y), cosh(a.x) * sin(a.y)); }
inline float2 c_cosh(float2 a) { return float2(cosh(a.x) * cos(a.y), sinh(a.x) * sin(a.y)); }
inline float2 c_pow(float2 a, float2 b) {
    if (b.y == 0.0f && b.x == floor(b.x) && fabs(b.x) <= 64.0f) {
        int n = int(fabs(b.x));
        float2 acc = float2(1.0f, 0.0f);
        float2 base = a;
        while (n > 0) {
            if ((n & 1) != 0) { acc = c_mul(acc, base); }
            base = c_mul(base, base);
            n >>= 1;
        }
        return b.x < 0.0f ? c_div(float2(1.0f, 0.0f), acc) : acc;
    }
    if (a.x == 0.0f && a.y == 0.0f) { return a; }
    return c_exp(c_mul(b, c_log(a)));
}
inline float2 c_bool(bool v) { return float2(v ? 1.0f : 0.0f, 0.0f); }
inline float2 c_lt(float2 a, float2 b) { return c_bool(a.x < b.x); }
inline float2 c_gt(float2 a, float2 b) { return c_bool(a.x > b.x); }
inline float2 c_le(float2 a, float2 b) { return c_bool(a.x <= b.x); }
inline float2 c_ge(float2 a, float2 b) { return c_bool(a.x >= b.x); }
inline float2 c_eq(float2 a, float2 b) { return c_bool(a.x == b.x); }
inline float2 c_ne(float2 a, float2 b) { return c_bool(a.x != b.x); }
inline float2 c_and(float2 a, float2 b) { return c_bool(a.x != 0.0f && b.x != 0.0f); }
inline float2 c_or(float2 a, float2 b) { return c_bool(a.x != 0.0f || b.x != 0.0f); }
inline float2 c_not(float2 a) { return c_bool(a.x == 0.0f); }

inline float2 pixel_offset(constant Uniforms& u, uint2 gid) {
    float px = (float(gid.x) + 0.5f + u.jitter.x - 0.5f * float(u.width)) * u.pixel_size;
    float py = (0.5f * float(u.height) - (float(gid.y) + 0.5f + u.jitter.y)) * u.pixel_size;
    if (u.flip_x != 0u) { px = -px; }
    if (u.flip_y != 0u) { py = -py; }
    float s = sin(u.rotation);
    float k = cos(u.rotation);
    return float2(px * k - py * s, px * s + py * k);
}

kernel void orbit_kernel(
    constant Uniforms& u [[buffer(0)]],
    device float2* points [[buffer(1)]],
    device atomic_uint* count [[buffer(2)]],
    uint tid [[thread_position_in_grid]]
) {
    if (tid != 0u) { return; }
    float2 c = u.seed;
    float2 z = float2(0.0f, 0.0f);
    z = @INITIAL@;
    uint n = 0u;
    for (uint k = 0u; k < u.iterations; ++k) {
        z = @ITERATE@;
        points[n] = z;
        n += 1u;
        if ((@BAILOUT@).x != 0.0f) { break; }
    }
    atomic_store_explicit(count, n, memory_order_relaxed);
}

kernel void surface_kernel(
    constant Uniforms& u [[buffer(0)]],
    device Sample* out [[buffer(1)]],
    uint2 gid [[thread_position_in_grid]]
) {
    if (gid.x >= u.width || gid.y >= u.height) { return; }
    if (u.stage != STAGE_COMPUTE) { return; }

    float2 p = (u.center_hi + pixel_offset(u, gid)) + u.center_lo;
    float2 c = u.julia != 0u ? u.seed : p;
    float2 z = float2(0.0f, 0.0f);
    z = @INITIAL@;
    if (u.julia != 0u) { z = p; }

    Sample s;
    s.iterations = u.iterations;
    s.escaped = 0u;
    s._pad = 0u;
    for (uint n = 0u; n < u.iterations; ++n) {
        if ((@BAILOUT@).x != 0.0f) {
            s.iterations = n;
            s.escaped = 1u;
            break;
        }
        z = @ITERATE@;
    }
    s.norm = dot(z, z);
    out[gid.y * u.width + gid.x] = s;
}
"#;

/// Splices the three formula expressions into `template`.
///
/// The template must carry each marker exactly [`MARKER_USES`] times.
pub fn instantiate(
    template: &str,
    iterate: &str,
    bailout: &str,
    initial: &str,
) -> Result<String, CompileError> {
    for marker in [ITERATE_MARKER, BAILOUT_MARKER, INITIAL_MARKER] {
        let uses = template.matches(marker).count();
        if uses != MARKER_USES {
            return Err(CompileError::Template(format!(
                "marker {marker} appears {uses} time(s), expected {MARKER_USES}"
            )));
        }
    }
    Ok(template
        .replace(ITERATE_MARKER, iterate)
        .replace(BAILOUT_MARKER, bailout)
        .replace(INITIAL_MARKER, initial))
}
